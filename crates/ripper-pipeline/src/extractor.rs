//! Batched structure extraction.
//!
//! Items are partitioned into batches and each batch is one provider call.
//! Output that cannot be parsed splits the batch in half and both halves go
//! back on an explicit worklist, so split depth is bounded by
//! `max_split_depth` instead of the call stack. Records that parse but fail
//! validation land in the failed set; the stage itself never fails the job.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ripper_core::{
    CompletionRequest, ExtractionConfig, ExtractionRecord, LlmProvider, ModelSelection,
    ParseError, ProviderError, RawSkeleton, RetrySettings, SourceItem,
};
use ripper_infra::{ResilienceError, RetryConfig, RetryPolicy, StageBudget};

use crate::parse::parse_records;
use crate::prompts::extraction_prompt;
use crate::CallError;

/// Progress after each round of batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionProgress {
    /// Items resolved so far, extracted or failed
    pub processed: usize,
    pub total: usize,
    pub extracted: usize,
    pub failed: usize,
}

/// Why one item produced no record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub item_id: String,
    pub reason: String,
}

/// Everything the stage produced.
#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    pub records: Vec<ExtractionRecord>,
    pub failed_ids: Vec<String>,
    pub failures: Vec<ItemFailure>,
    pub provider_calls: usize,
    /// Cancellation was observed; unprocessed items are neither extracted
    /// nor failed.
    pub cancelled: bool,
    /// A terminal provider error stopped the stage.
    pub stage_error: Option<ProviderError>,
}

impl ExtractionOutcome {
    fn fail(&mut self, item_id: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(item_id = %item_id, reason = %reason, "Extraction failed for item");
        self.failed_ids.push(item_id.to_string());
        self.failures.push(ItemFailure {
            item_id: item_id.to_string(),
            reason,
        });
    }

    pub fn processed(&self) -> usize {
        self.records.len() + self.failed_ids.len()
    }
}

struct Batch {
    items: Vec<SourceItem>,
    depth: u32,
}

enum BatchResult {
    Parsed(Vec<RawSkeleton>),
    Malformed(ParseError),
    Failed(ResilienceError<CallError>),
}

/// Split items into batches of `min..=max` near-equal sizes.
///
/// When no such split exists (fewer than `min` items, or e.g. 7 items into
/// 4..=5), batches of `min` are cut and the remainder forms one smaller
/// batch. No batch ever exceeds `max`.
pub fn partition(items: Vec<SourceItem>, min: usize, max: usize) -> Vec<Vec<SourceItem>> {
    let n = items.len();
    if n == 0 {
        return Vec::new();
    }
    let max = max.max(1);
    let min = min.clamp(1, max);
    let mut rest = items.into_iter();

    let batches = n.div_ceil(max);
    if batches * min > n {
        let mut out = Vec::with_capacity(n.div_ceil(min));
        while !rest.as_slice().is_empty() {
            out.push(rest.by_ref().take(min).collect());
        }
        return out;
    }

    let base = n / batches;
    let extra = n % batches;
    (0..batches)
        .map(|i| rest.by_ref().take(base + usize::from(i < extra)).collect())
        .collect()
}

/// LLM-backed extractor for one job.
pub struct BatchExtractor {
    provider: Arc<dyn LlmProvider>,
    model: ModelSelection,
    config: ExtractionConfig,
    retry: RetryConfig,
}

impl BatchExtractor {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: ModelSelection,
        config: ExtractionConfig,
        retry: &RetrySettings,
    ) -> Self {
        let retry = RetryConfig::from(retry).with_attempt_timeout(config.call_timeout());
        Self {
            provider,
            model,
            config,
            retry,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract records for `items`.
    ///
    /// `on_progress` is called after every round of batches. Cancellation is
    /// checked before every round and before every provider attempt; a call
    /// already in flight is allowed to finish.
    pub async fn extract<F>(
        &self,
        items: Vec<SourceItem>,
        cancel: &CancellationToken,
        on_progress: F,
    ) -> ExtractionOutcome
    where
        F: Fn(ExtractionProgress) + Send + Sync,
    {
        let total = items.len();
        let mut outcome = ExtractionOutcome::default();
        let policy = RetryPolicy::new(self.retry.clone())
            .within(StageBudget::start(self.config.stage_budget()));

        // Stack: pop from the end, so push in reverse.
        let mut work: Vec<Batch> = partition(
            items,
            self.config.min_batch_size,
            self.config.max_batch_size,
        )
            .into_iter()
            .rev()
            .map(|items| Batch { items, depth: 0 })
            .collect();

        info!(
            items = total,
            batches = work.len(),
            model = %self.model,
            "Starting extraction"
        );

        let concurrency = self.config.concurrency.max(1);
        while !work.is_empty() {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            let round: Vec<Batch> = (0..concurrency.min(work.len()))
                .filter_map(|_| work.pop())
                .collect();
            let calls = AtomicUsize::new(0);
            let results = join_all(
                round
                    .iter()
                    .map(|batch| self.run_batch(&batch.items, &policy, cancel, &calls)),
            )
            .await;
            outcome.provider_calls += calls.load(Ordering::SeqCst);

            let mut splits = Vec::new();
            for (batch, result) in round.into_iter().zip(results) {
                match result {
                    BatchResult::Parsed(raw) => self.collect(batch.items, raw, &mut outcome),
                    BatchResult::Malformed(err) => {
                        if batch.items.len() > 1 && batch.depth < self.config.max_split_depth {
                            let mut first = batch.items;
                            let second = first.split_off(first.len() / 2);
                            debug!(
                                depth = batch.depth + 1,
                                left = first.len(),
                                right = second.len(),
                                error = %err,
                                "Unparseable output, splitting batch"
                            );
                            splits.push(Batch {
                                items: first,
                                depth: batch.depth + 1,
                            });
                            splits.push(Batch {
                                items: second,
                                depth: batch.depth + 1,
                            });
                        } else {
                            for item in &batch.items {
                                outcome.fail(&item.id, format!("unparseable model output: {}", err));
                            }
                        }
                    }
                    BatchResult::Failed(ResilienceError::Terminal(CallError::Cancelled)) => {
                        outcome.cancelled = true;
                        work.push(batch);
                    }
                    BatchResult::Failed(err) => {
                        let message = err.to_string();
                        warn!(
                            items = batch.items.len(),
                            attempts = err.attempts(),
                            error = %message,
                            "Batch failed"
                        );
                        if err.is_terminal() && outcome.stage_error.is_none() {
                            if let Some(CallError::Provider(e)) = err.into_inner() {
                                outcome.stage_error = Some(e);
                            }
                        }
                        for item in &batch.items {
                            outcome.fail(&item.id, format!("provider call failed: {}", message));
                        }
                    }
                }
            }
            // Second half first, so the first half is popped next.
            while let Some(batch) = splits.pop() {
                work.push(batch);
            }

            on_progress(ExtractionProgress {
                processed: outcome.processed(),
                total,
                extracted: outcome.records.len(),
                failed: outcome.failed_ids.len(),
            });

            if outcome.cancelled {
                break;
            }
            if let Some(message) = outcome
                .stage_error
                .as_ref()
                .map(|e| format!("stage stopped after terminal provider error: {}", e))
            {
                for batch in work.drain(..) {
                    for item in &batch.items {
                        outcome.fail(&item.id, message.clone());
                    }
                }
            }
        }

        if outcome.cancelled {
            info!(
                extracted = outcome.records.len(),
                failed = outcome.failed_ids.len(),
                "Extraction cancelled"
            );
        } else {
            info!(
                extracted = outcome.records.len(),
                failed = outcome.failed_ids.len(),
                calls = outcome.provider_calls,
                "Extraction complete"
            );
        }
        outcome
    }

    async fn run_batch(
        &self,
        items: &[SourceItem],
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        calls: &AtomicUsize,
    ) -> BatchResult {
        let request = CompletionRequest::new(self.model.model.clone(), extraction_prompt(items))
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens)
            .with_timeout(self.config.call_timeout());
        let provider = &self.provider;
        let request = &request;

        let response = policy
            .execute(
                move |_attempt| async move {
                    if cancel.is_cancelled() {
                        return Err(CallError::Cancelled);
                    }
                    calls.fetch_add(1, Ordering::SeqCst);
                    provider.complete(request).await.map_err(CallError::Provider)
                },
                CallError::is_retryable,
            )
            .await;

        match response {
            Ok(text) => match parse_records(&text) {
                Ok(raw) => BatchResult::Parsed(raw),
                Err(e) => BatchResult::Malformed(e),
            },
            Err(e) => BatchResult::Failed(e),
        }
    }

    /// Match returned records to batch items by id and validate them.
    fn collect(&self, items: Vec<SourceItem>, raw: Vec<RawSkeleton>, outcome: &mut ExtractionOutcome) {
        let mut by_id: HashMap<String, RawSkeleton> = HashMap::new();
        for record in raw {
            match record.item_id() {
                Some(id) if items.iter().any(|item| item.id == id) => {
                    by_id.entry(id).or_insert(record);
                }
                Some(id) => debug!(item_id = %id, "Ignoring record for an item outside the batch"),
                None => debug!("Ignoring record without an item id"),
            }
        }

        for item in items {
            match by_id.remove(&item.id) {
                Some(raw) => match raw.validate() {
                    Ok(skeleton) => outcome
                        .records
                        .push(ExtractionRecord::new(skeleton, &item, &self.model)),
                    Err(rejection) => outcome.fail(&item.id, rejection.to_string()),
                },
                None => outcome.fail(&item.id, "missing from model output"),
            }
        }
    }
}
