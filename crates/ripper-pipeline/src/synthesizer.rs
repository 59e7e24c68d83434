//! Pattern synthesis over the aggregated view.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ripper_core::{
    AggregatedView, CompletionRequest, LlmProvider, ModelSelection, ProviderError, RetrySettings,
    SynthesisArtifact, SynthesisConfig, SynthesisTemplate,
};
use ripper_infra::{ResilienceError, RetryConfig, RetryPolicy, StageBudget};

use crate::prompts::{synthesis_user_prompt, SYNTHESIS_SYSTEM_PROMPT};
use crate::{CallError, PipelineError, Result};

/// Result of a successful synthesis.
#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    pub artifact: SynthesisArtifact,
    pub provider_calls: u32,
}

/// One synthesis call, retried once with a longer timeout.
pub struct Synthesizer {
    provider: Arc<dyn LlmProvider>,
    model: ModelSelection,
    config: SynthesisConfig,
    retry: RetryConfig,
}

impl Synthesizer {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: ModelSelection,
        config: SynthesisConfig,
        retry: &RetrySettings,
    ) -> Self {
        Self {
            provider,
            model,
            config,
            retry: RetryConfig::from(retry).with_max_attempts(2),
        }
    }

    fn timeout_for(&self, attempt: u32) -> std::time::Duration {
        if attempt <= 1 {
            self.config.timeout()
        } else {
            self.config.retry_timeout()
        }
    }

    pub async fn synthesize(
        &self,
        view: &AggregatedView,
        cancel: &CancellationToken,
    ) -> Result<SynthesisOutcome> {
        if view.is_empty() {
            return Err(PipelineError::EmptyInput);
        }

        let prompt = synthesis_user_prompt(view)?;
        let policy =
            RetryPolicy::new(self.retry.clone()).within(StageBudget::start(self.config.stage_budget()));
        let calls = AtomicU32::new(0);

        info!(
            records = view.total_records,
            creators = view.creator_count(),
            model = %self.model,
            "Synthesizing patterns"
        );

        let provider = &self.provider;
        let calls_ref = &calls;
        let prompt = &prompt;
        let result = policy
            .execute(
                move |attempt| {
                    let timeout = self.timeout_for(attempt);
                    let request = CompletionRequest::new(self.model.model.clone(), prompt.clone())
                        .with_system(SYNTHESIS_SYSTEM_PROMPT)
                        .with_temperature(self.config.temperature)
                        .with_max_tokens(self.config.max_tokens)
                        .with_timeout(timeout);
                    async move {
                        if cancel.is_cancelled() {
                            return Err(CallError::Cancelled);
                        }
                        calls_ref.fetch_add(1, Ordering::SeqCst);
                        if attempt > 1 {
                            warn!(attempt, timeout = ?timeout, "Retrying synthesis with a longer timeout");
                        }
                        match tokio::time::timeout(timeout, provider.complete(&request)).await {
                            Ok(result) => result.map_err(CallError::Provider),
                            Err(_) => Err(CallError::Provider(ProviderError::Timeout(timeout))),
                        }
                    }
                },
                CallError::is_retryable,
            )
            .await;

        let provider_calls = calls.load(Ordering::SeqCst);
        match result {
            Ok(text) => {
                let artifact = parse_synthesis(&text, &self.model, provider_calls);
                info!(
                    templates = artifact.templates.len(),
                    attempts = provider_calls,
                    "Synthesis complete"
                );
                Ok(SynthesisOutcome {
                    artifact,
                    provider_calls,
                })
            }
            Err(ResilienceError::Terminal(CallError::Cancelled)) => Err(PipelineError::Cancelled),
            Err(e) => {
                error!(attempts = provider_calls, error = %e, "Synthesis failed");
                Err(PipelineError::SynthesisFailed {
                    attempts: provider_calls,
                    message: e.to_string(),
                })
            }
        }
    }
}

/// Build the artifact from the model's markdown.
pub fn parse_synthesis(text: &str, model: &ModelSelection, attempts: u32) -> SynthesisArtifact {
    SynthesisArtifact {
        analysis: text.trim().to_string(),
        templates: extract_templates(text),
        quick_wins: section_items(text, "quick wins"),
        warnings: section_items(text, "warnings"),
        model_used: model.to_string(),
        synthesized_at: Utc::now(),
        attempts,
    }
}

/// Templates start at `## Template ...` or `### Template ...` and collect
/// `**Key:** value` lines until the next template.
fn extract_templates(text: &str) -> Vec<SynthesisTemplate> {
    let mut templates = Vec::new();
    let mut current: Option<SynthesisTemplate> = None;

    for line in text.lines().map(str::trim) {
        if line.starts_with("## Template") || line.starts_with("### Template") {
            if let Some(done) = current.take() {
                templates.push(done);
            }
            let name = match line.split_once(':') {
                Some((_, name)) => name.trim(),
                None => line.trim_start_matches('#').trim(),
            };
            current = Some(SynthesisTemplate {
                name: name.to_string(),
                components: BTreeMap::new(),
            });
        } else if let Some(template) = current.as_mut() {
            if let Some((key, value)) = line.strip_prefix("**").and_then(|l| l.split_once(":**")) {
                template
                    .components
                    .insert(key.replace("**", "").trim().to_lowercase(), value.trim().to_string());
            }
        }
    }
    templates.extend(current);
    templates
}

/// Bullet items under the first heading that mentions `section`.
fn section_items(text: &str, section: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut inside = false;

    for line in text.lines().map(str::trim) {
        if line.starts_with('#') {
            if inside {
                break;
            }
            inside = line.to_lowercase().contains(section);
            continue;
        }
        if inside {
            if let Some(item) = line.strip_prefix('-').or_else(|| line.strip_prefix('*')) {
                let item = item.trim();
                if !item.is_empty() {
                    items.push(item.to_string());
                }
            }
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const RESPONSE: &str = "# Pattern Analysis\nQuestions dominate.\n\n\
        # Templates\n\
        ## Template 1: The Myth Buster\n**Hook:** Everyone says X\n**Value:** Show why Y\n**CTA:** Follow\n\n\
        ## Template 2: Before and After\n**Hook:** I used to...\n\n\
        # Quick Wins\n- Cut the intro\n* Lead with the result\n\n\
        # Warnings\n- Do not bury the hook\n";

    struct Flaky {
        calls: AtomicUsize,
        fail_first: Option<ProviderError>,
        timeouts: std::sync::Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl LlmProvider for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, ProviderError> {
            self.timeouts.lock().unwrap().push(request.timeout);
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match (&self.fail_first, n) {
                (Some(e), 0) => Err(e.clone()),
                _ => Ok(RESPONSE.to_string()),
            }
        }
    }

    fn flaky(fail_first: Option<ProviderError>) -> Arc<Flaky> {
        Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail_first,
            timeouts: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn synthesizer(provider: Arc<Flaky>) -> Synthesizer {
        let retry = RetrySettings {
            base_delay_ms: 1,
            max_delay_ms: 2,
            ..RetrySettings::default()
        };
        Synthesizer::new(
            provider,
            ModelSelection::new("flaky", "big-model"),
            SynthesisConfig::default(),
            &retry,
        )
    }

    fn view() -> AggregatedView {
        AggregatedView {
            total_records: 1,
            ..AggregatedView::default()
        }
    }

    #[test]
    fn test_parse_synthesis_sections() {
        let artifact = parse_synthesis(RESPONSE, &ModelSelection::new("openai", "gpt-4o"), 1);
        assert_eq!(artifact.templates.len(), 2);
        assert_eq!(artifact.templates[0].name, "The Myth Buster");
        assert_eq!(
            artifact.templates[0].components.get("hook").map(String::as_str),
            Some("Everyone says X")
        );
        assert_eq!(artifact.templates[0].components.len(), 3);
        assert_eq!(artifact.quick_wins, vec!["Cut the intro", "Lead with the result"]);
        assert_eq!(artifact.warnings, vec!["Do not bury the hook"]);
        assert_eq!(artifact.model_used, "openai/gpt-4o");
    }

    #[tokio::test]
    async fn test_timeout_then_success_uses_longer_timeout() {
        let provider = flaky(Some(ProviderError::Timeout(Duration::from_secs(180))));
        let outcome = synthesizer(provider.clone())
            .synthesize(&view(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.provider_calls, 2);
        assert_eq!(outcome.artifact.attempts, 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *provider.timeouts.lock().unwrap(),
            vec![Duration::from_secs(180), Duration::from_secs(240)]
        );
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let provider = flaky(Some(ProviderError::Authentication("revoked".into())));
        let err = synthesizer(provider.clone())
            .synthesize(&view(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::SynthesisFailed { attempts: 1, .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_view_is_rejected() {
        let provider = flaky(None);
        let err = synthesizer(provider.clone())
            .synthesize(&AggregatedView::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::EmptyInput);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let provider = flaky(None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = synthesizer(provider.clone())
            .synthesize(&view(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, PipelineError::Cancelled);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
