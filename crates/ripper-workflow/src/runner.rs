//! Drives one job through its stages.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ripper_core::{
    AggregatedView, AnalysisRequest, FetchError, JobArtifact, JobId, JobIssue, JobRecord,
    LlmProvider, Phase, ShortfallAction, SourceItem, SynthesisArtifact,
};
use ripper_infra::{RetryConfig, RetryPolicy, StageBudget};
use ripper_pipeline::{
    aggregate, generate_report, BatchExtractor, ExtractionProgress, PipelineError, Synthesizer,
};

use crate::orchestrator::Shared;
use crate::progress;
use crate::WorkflowError;

/// Why a job stopped before its final phase.
enum Halt {
    Aborted,
    Failed { phase: Phase, message: String },
    Workflow(WorkflowError),
}

impl From<WorkflowError> for Halt {
    fn from(e: WorkflowError) -> Self {
        Halt::Workflow(e)
    }
}

type Step<T> = std::result::Result<T, Halt>;

/// How one item's transcript was resolved.
enum Resolved {
    Cached,
    Fetched,
    Invalid(String),
    Failed(String),
}

/// Items ready for extraction plus the coverage denominator.
struct Fetched {
    ready: Vec<SourceItem>,
    listed: usize,
}

/// Extraction results the later stages need.
struct Extracted {
    record: JobRecord,
    coverage: f64,
    shortfall: bool,
}

struct Runner {
    shared: Arc<Shared>,
    id: JobId,
    provider: Arc<dyn LlmProvider>,
    cancel: CancellationToken,
}

pub(crate) async fn run(
    shared: Arc<Shared>,
    id: JobId,
    provider: Arc<dyn LlmProvider>,
    cancel: CancellationToken,
) {
    let runner = Runner {
        shared,
        id,
        provider,
        cancel,
    };
    if let Err(halt) = runner.drive().await {
        runner.finish(halt).await;
    }
}

impl Runner {
    async fn commit<F>(&self, mutate: F) -> Step<JobRecord>
    where
        F: FnOnce(&mut JobRecord),
    {
        Ok(self.shared.commit(self.id, mutate).await?)
    }

    fn checkpoint(&self) -> Step<()> {
        if self.cancel.is_cancelled() {
            Err(Halt::Aborted)
        } else {
            Ok(())
        }
    }

    async fn drive(&self) -> Step<()> {
        self.checkpoint()?;
        let record = self
            .commit(|r| {
                r.phase = Phase::Fetching;
                r.started_at = Some(Utc::now());
                r.message = format!("Listing items for {} sources", r.request.sources.len());
            })
            .await?;
        let request = record.request;

        let fetched = self.fetch(&request).await?;
        let extracted = self.extract(&request, fetched).await?;
        let view = self.aggregate(&extracted.record).await?;
        let synthesis = self.synthesize(&request, &view).await?;
        self.complete(&request, extracted, view, synthesis).await
    }

    async fn fetch(&self, request: &AnalysisRequest) -> Step<Fetched> {
        let config = &self.shared.config;
        let services = &self.shared.services;
        let policy = RetryPolicy::new(
            RetryConfig::from(&config.retry).with_attempt_timeout(config.fetch.call_timeout()),
        )
        .within(StageBudget::start(config.fetch.stage_budget()));

        let cap = request.items_per_source as usize;
        let sources = request.sources.len();
        let mut listed: Vec<SourceItem> = Vec::new();
        let mut seen = HashSet::new();

        for (done, source) in request.sources.iter().enumerate() {
            self.checkpoint()?;
            let result = policy
                .execute(
                    |_| services.source.list_items(source.platform, &source.creator, cap),
                    FetchError::is_retryable,
                )
                .await;

            let issue = match result {
                Ok(items) => {
                    let before = listed.len();
                    for mut item in items {
                        if listed.len() - before == cap {
                            break;
                        }
                        item.source = source.clone();
                        if seen.insert(item.cache_key()) {
                            listed.push(item);
                        }
                    }
                    info!(job_id = %self.id, source = %source, items = listed.len() - before, "Listed items");
                    None
                }
                Err(e) => {
                    warn!(job_id = %self.id, source = %source, error = %e, "Listing failed");
                    Some(JobIssue::for_item(Phase::Fetching, source.handle(), e.to_string()))
                }
            };

            let count = listed.len();
            self.commit(|r| {
                r.counters.items_listed = count;
                r.percent = progress::fetching(done + 1, sources * 2);
                r.errors.extend(issue);
            })
            .await?;
        }

        let total = listed.len();
        let mut ready = Vec::with_capacity(total);
        for (done, mut item) in listed.into_iter().enumerate() {
            self.checkpoint()?;
            let key = item.cache_key();
            let provided = item.transcript.take().filter(|t| !t.trim().is_empty());
            let (platform, creator, item_id) = (item.source.platform, item.source.creator.clone(), item.id.clone());

            let lookup = services
                .cache
                .get_or_fetch(&key, || async {
                    match provided {
                        Some(transcript) => Ok(transcript),
                        None => {
                            policy
                                .execute(
                                    |_| services.fetcher.fetch_transcript(platform, &creator, &item_id),
                                    FetchError::is_retryable,
                                )
                                .await
                        }
                    }
                })
                .await;

            let id = item.id.clone();
            let resolved = match lookup {
                Ok(lookup) if lookup.is_valid() => {
                    let resolved = if lookup.from_cache {
                        Resolved::Cached
                    } else {
                        Resolved::Fetched
                    };
                    item.transcript = Some(lookup.transcript);
                    item.from_cache = lookup.from_cache;
                    ready.push(item);
                    resolved
                }
                Ok(lookup) => Resolved::Invalid(format!("invalid transcript: {}", lookup.verdict)),
                Err(e) => Resolved::Failed(format!("transcript fetch failed: {}", e)),
            };
            if let Resolved::Invalid(reason) | Resolved::Failed(reason) = &resolved {
                warn!(job_id = %self.id, item_id = %id, reason = %reason, "Item excluded");
            }

            self.commit(|r| {
                let counters = &mut r.counters;
                let reason = match resolved {
                    Resolved::Cached => {
                        counters.transcripts_from_cache += 1;
                        counters.valid_transcripts += 1;
                        None
                    }
                    Resolved::Fetched => {
                        counters.transcripts_fetched += 1;
                        counters.valid_transcripts += 1;
                        None
                    }
                    Resolved::Invalid(reason) => {
                        counters.transcripts_fetched += 1;
                        counters.invalid_transcripts += 1;
                        Some(reason)
                    }
                    Resolved::Failed(reason) => Some(reason),
                };
                if let Some(reason) = reason {
                    r.outputs.failed_ids.push(id.clone());
                    r.counters.items_failed = r.outputs.failed_ids.len();
                    r.errors.push(JobIssue::for_item(Phase::Fetching, id, reason));
                }
                r.percent = progress::fetching(total + done + 1, total * 2);
                r.message = format!("Resolved transcripts for {}/{} items", done + 1, total);
            })
            .await?;
        }

        Ok(Fetched { ready, listed: total })
    }

    async fn extract(&self, request: &AnalysisRequest, fetched: Fetched) -> Step<Extracted> {
        let config = &self.shared.config;
        let Fetched { ready, listed } = fetched;
        let total = ready.len();

        self.checkpoint()?;
        self.commit(|r| {
            r.phase = Phase::Extracting;
            r.message = format!("Extracting skeletons from {} items", total);
        })
        .await?;

        let extractor = BatchExtractor::new(
            self.provider.clone(),
            request.model.clone(),
            config.extraction.clone(),
            &config.retry,
        );
        let (tx, mut rx) = watch::channel(None::<ExtractionProgress>);
        let extraction = extractor.extract(ready, &self.cancel, move |p| {
            let _ = tx.send(Some(p));
        });
        tokio::pin!(extraction);

        let mut open = true;
        let outcome = loop {
            tokio::select! {
                outcome = &mut extraction => break outcome,
                changed = rx.changed(), if open => {
                    if changed.is_err() {
                        open = false;
                        continue;
                    }
                    let latest = *rx.borrow_and_update();
                    if let Some(p) = latest {
                        self.commit(|r| {
                            r.counters.records_extracted = p.extracted;
                            r.percent = progress::extracting(p.processed, total);
                            r.message = format!("Extracted {}/{} items", p.processed, total);
                        })
                        .await?;
                    }
                }
            }
        };

        let coverage = if listed == 0 {
            0.0
        } else {
            outcome.records.len() as f64 / listed as f64
        };
        let pipeline = &config.pipeline;
        let below = coverage < pipeline.min_valid_ratio;
        let shortfall_message = format!(
            "coverage {:.0}% is below the {:.0}% threshold ({} of {} items)",
            coverage * 100.0,
            pipeline.min_valid_ratio * 100.0,
            outcome.records.len(),
            listed
        );

        let processed = outcome.processed();
        let calls = outcome.provider_calls;
        let cancelled = outcome.cancelled;
        let stage_error = outcome.stage_error.clone();
        let shortfall_issue = (below
            && pipeline.shortfall_action == ShortfallAction::Partial
            && !outcome.records.is_empty()
            && stage_error.is_none()
            && !cancelled)
            .then(|| JobIssue::new(Phase::Extracting, shortfall_message.clone()));

        let record = self
            .commit(move |r| {
                r.counters.records_extracted = outcome.records.len();
                r.counters.provider_calls += calls;
                r.errors.extend(
                    outcome
                        .failures
                        .into_iter()
                        .map(|f| JobIssue::for_item(Phase::Extracting, f.item_id, f.reason)),
                );
                r.outputs.failed_ids.extend(outcome.failed_ids);
                r.counters.items_failed = r.outputs.failed_ids.len();
                r.outputs.records = outcome.records;
                r.outputs.coverage = Some(coverage);
                if !cancelled {
                    r.percent = progress::extracting(processed, total);
                }
                r.errors.extend(shortfall_issue);
                r.message = format!(
                    "Extracted {} records, {} items failed",
                    r.outputs.records.len(),
                    r.outputs.failed_ids.len()
                );
            })
            .await?;

        if cancelled {
            return Err(Halt::Aborted);
        }
        if let Some(e) = stage_error {
            return Err(Halt::Failed {
                phase: Phase::Extracting,
                message: format!("extraction stopped: {}", e),
            });
        }
        if record.outputs.records.is_empty() {
            return Err(Halt::Failed {
                phase: Phase::Extracting,
                message: "no valid extraction records".to_string(),
            });
        }
        if below && pipeline.shortfall_action == ShortfallAction::Fail {
            return Err(Halt::Failed {
                phase: Phase::Extracting,
                message: shortfall_message,
            });
        }

        let shortfall =
            below || (pipeline.partial_on_item_failures && !record.outputs.failed_ids.is_empty());
        Ok(Extracted {
            record,
            coverage,
            shortfall,
        })
    }

    async fn aggregate(&self, record: &JobRecord) -> Step<AggregatedView> {
        self.checkpoint()?;
        let records = &record.outputs.records;
        self.commit(|r| {
            r.phase = Phase::Aggregating;
            r.message = format!("Aggregating {} records", records.len());
        })
        .await?;

        let view = aggregate(records).map_err(|e| Halt::Failed {
            phase: Phase::Aggregating,
            message: e.to_string(),
        })?;
        let stored = view.clone();
        self.commit(move |r| r.outputs.aggregated = Some(stored)).await?;
        Ok(view)
    }

    async fn synthesize(
        &self,
        request: &AnalysisRequest,
        view: &AggregatedView,
    ) -> Step<SynthesisArtifact> {
        self.checkpoint()?;
        self.commit(|r| {
            r.phase = Phase::Synthesizing;
            r.message = format!("Synthesizing patterns across {} creators", view.creator_count());
        })
        .await?;

        let config = &self.shared.config;
        let synthesizer = Synthesizer::new(
            self.provider.clone(),
            request.model.clone(),
            config.synthesis.clone(),
            &config.retry,
        );

        match synthesizer.synthesize(view, &self.cancel).await {
            Ok(outcome) => {
                let artifact = outcome.artifact.clone();
                let calls = outcome.provider_calls as usize;
                self.commit(move |r| {
                    r.counters.provider_calls += calls;
                    r.outputs.synthesis = Some(outcome.artifact);
                    r.message = "Synthesis complete".to_string();
                })
                .await?;
                Ok(artifact)
            }
            Err(PipelineError::Cancelled) => Err(Halt::Aborted),
            Err(e) => {
                if let PipelineError::SynthesisFailed { attempts, .. } = &e {
                    let calls = *attempts as usize;
                    self.commit(move |r| r.counters.provider_calls += calls).await?;
                }
                Err(Halt::Failed {
                    phase: Phase::Synthesizing,
                    message: e.to_string(),
                })
            }
        }
    }

    async fn complete(
        &self,
        request: &AnalysisRequest,
        extracted: Extracted,
        view: AggregatedView,
        synthesis: SynthesisArtifact,
    ) -> Step<()> {
        self.checkpoint()?;
        let Extracted {
            record,
            coverage,
            shortfall,
        } = extracted;

        let completed_at = Utc::now();
        let report = generate_report(
            request,
            &view,
            &synthesis,
            coverage,
            &record.outputs.failed_ids,
            completed_at,
        );
        let stored = report.clone();
        self.commit(move |r| r.outputs.report = Some(stored)).await?;

        let artifact = JobArtifact {
            job_id: self.id,
            request: request.clone(),
            records: record.outputs.records,
            failed_ids: record.outputs.failed_ids,
            coverage,
            aggregated: view,
            synthesis,
            report,
            completed_at,
        };
        self.checkpoint()?;
        let asset_id = self
            .shared
            .services
            .assets
            .store(&artifact)
            .await
            .map_err(|e| Halt::Failed {
                phase: Phase::Synthesizing,
                message: format!("asset store failed: {}", e),
            })?;

        let phase = if shortfall { Phase::Partial } else { Phase::Complete };
        let records = artifact.records.len();
        self.commit(move |r| {
            r.phase = phase;
            r.asset_id = Some(asset_id);
            r.completed_at = Some(completed_at);
            r.message = if shortfall {
                format!("Finished with partial coverage ({:.0}%, {} records)", coverage * 100.0, records)
            } else {
                format!("Analysis complete: {} records", records)
            };
        })
        .await?;
        info!(job_id = %self.id, phase = %phase, records, coverage, "Job finished");
        Ok(())
    }

    async fn finish(&self, halt: Halt) {
        let result = match halt {
            Halt::Aborted => {
                info!(job_id = %self.id, "Job aborted");
                self.commit(|r| {
                    r.message = format!("Aborted during {}", r.phase);
                    r.phase = Phase::Aborted;
                    r.completed_at = Some(Utc::now());
                })
                .await
            }
            Halt::Failed { phase, message } => {
                error!(job_id = %self.id, phase = %phase, error = %message, "Job failed");
                self.commit(|r| {
                    r.errors.push(JobIssue::new(phase, message.clone()));
                    r.phase = Phase::Error;
                    r.message = message;
                    r.completed_at = Some(Utc::now());
                })
                .await
            }
            Halt::Workflow(e) => {
                error!(job_id = %self.id, error = %e, "Job stopped");
                return;
            }
        };
        if let Err(Halt::Workflow(e)) = result {
            error!(job_id = %self.id, error = %e, "Failed to record final job state");
        }
    }
}
