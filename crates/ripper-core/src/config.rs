use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ValidationError;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub extraction: ExtractionConfig,
    pub synthesis: SynthesisConfig,
    pub fetch: FetchConfig,
    pub retry: RetrySettings,
    pub transcript: TranscriptConfig,
    pub providers: ProvidersConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None, "RIPPER")
    }

    /// Load configuration from an optional file, then environment overrides
    /// with the given prefix (`PREFIX__SECTION__KEY`).
    pub fn load_from(path: Option<&Path>, prefix: &str) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix(prefix)
                .separator("__")
                .try_parsing(true),
        );

        let mut config: AppConfig = builder.build()?.try_deserialize()?;
        config.providers.apply_standard_env();
        Ok(config)
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |msg: &str| Err(ValidationError::Config(msg.to_string()));

        if !(0.0..=1.0).contains(&self.pipeline.min_valid_ratio) {
            return invalid("pipeline.min_valid_ratio must be within 0..=1");
        }
        if self.pipeline.max_sources == 0 || self.pipeline.max_items_per_source == 0 {
            return invalid("pipeline limits must be positive");
        }
        if self.pipeline.max_sources > MAX_SOURCES {
            return invalid("pipeline.max_sources must be at most 5");
        }
        if self.extraction.min_batch_size == 0
            || self.extraction.min_batch_size > self.extraction.max_batch_size
        {
            return invalid("extraction batch sizes must satisfy 0 < min <= max");
        }
        if self.extraction.concurrency == 0 {
            return invalid("extraction.concurrency must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.retry.multiplier < 1.0 {
            return invalid("retry.multiplier must be >= 1.0");
        }
        Ok(())
    }
}

/// On-disk locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl StorageConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }

    pub fn transcript_cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache").join("transcripts")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.data_dir.join("output")
    }
}

/// What happens when extraction coverage falls below the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShortfallAction {
    /// Keep going and finish the job as `partial`.
    #[default]
    Partial,
    /// Stop after extraction and finish the job as `error`.
    Fail,
}

/// Hard ceiling on sources per request; `max_sources` may only lower it.
pub const MAX_SOURCES: usize = 5;

/// Request limits and coverage policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub min_valid_ratio: f64,
    pub shortfall_action: ShortfallAction,
    /// Finish as `partial` whenever any item failed, even above the threshold.
    pub partial_on_item_failures: bool,
    pub max_sources: usize,
    pub max_items_per_source: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_valid_ratio: 0.6,
            shortfall_action: ShortfallAction::Partial,
            partial_on_item_failures: false,
            max_sources: 5,
            max_items_per_source: 5,
        }
    }
}

impl PipelineConfig {
    pub fn with_min_valid_ratio(mut self, ratio: f64) -> Self {
        self.min_valid_ratio = ratio;
        self
    }

    pub fn with_shortfall_action(mut self, action: ShortfallAction) -> Self {
        self.shortfall_action = action;
        self
    }
}

/// Batched extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub max_split_depth: u32,
    pub concurrency: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub call_timeout_secs: u64,
    pub stage_budget_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_batch_size: 3,
            max_batch_size: 5,
            max_split_depth: 3,
            concurrency: 1,
            temperature: 0.0,
            max_tokens: 4096,
            call_timeout_secs: 120,
            stage_budget_secs: 1800,
        }
    }
}

impl ExtractionConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn stage_budget(&self) -> Duration {
        Duration::from_secs(self.stage_budget_secs)
    }

    pub fn with_batch_range(mut self, min: usize, max: usize) -> Self {
        self.min_batch_size = min;
        self.max_batch_size = max;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// Synthesis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Added to the timeout of the single retry.
    pub retry_timeout_bump_secs: u64,
    pub stage_budget_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
            timeout_secs: 180,
            retry_timeout_bump_secs: 60,
            stage_budget_secs: 600,
        }
    }
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs + self.retry_timeout_bump_secs)
    }

    pub fn stage_budget(&self) -> Duration {
        Duration::from_secs(self.stage_budget_secs)
    }
}

/// Source listing and transcript fetch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub call_timeout_secs: u64,
    pub stage_budget_secs: u64,
    pub scraper_base_url: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 120,
            stage_budget_secs: 1800,
            scraper_base_url: "http://127.0.0.1:5001".to_string(),
        }
    }
}

impl FetchConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn stage_budget(&self) -> Duration {
        Duration::from_secs(self.stage_budget_secs)
    }
}

/// Backoff settings shared by every retried call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Transcript validation heuristics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    pub min_words: usize,
    pub garbage_patterns: Vec<String>,
    /// Largest share of all words a single token may account for.
    pub max_dominant_token_ratio: f64,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            min_words: 10,
            garbage_patterns: ["music", "♪", "subscribe", "[applause]", "[laughter]"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_dominant_token_ratio: 0.5,
        }
    }
}

/// Credentials and endpoints of one hosted provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderEndpoint {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl ProviderEndpoint {
    pub fn has_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai: ProviderEndpoint,
    pub anthropic: ProviderEndpoint,
    pub google: ProviderEndpoint,
    pub ollama_url: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai: ProviderEndpoint::default(),
            anthropic: ProviderEndpoint::default(),
            google: ProviderEndpoint::default(),
            ollama_url: "http://localhost:11434".to_string(),
        }
    }
}

impl ProvidersConfig {
    /// Fill missing keys from the conventional provider variables.
    pub fn apply_standard_env(&mut self) {
        let fill = |endpoint: &mut ProviderEndpoint, var: &str| {
            if !endpoint.has_key() {
                endpoint.api_key = std::env::var(var).ok().filter(|k| !k.trim().is_empty());
            }
        };
        fill(&mut self.openai, "OPENAI_API_KEY");
        fill(&mut self.anthropic, "ANTHROPIC_API_KEY");
        fill(&mut self.google, "GOOGLE_API_KEY");
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.min_valid_ratio, 0.6);
        assert_eq!(config.pipeline.shortfall_action, ShortfallAction::Partial);
        assert_eq!(config.extraction.concurrency, 1);
        assert_eq!(config.synthesis.retry_timeout(), Duration::from_secs(240));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.pipeline.min_valid_ratio = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.extraction = config.extraction.with_batch_range(6, 5);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipeline.max_sources = MAX_SOURCES + 1;
        assert!(config.validate().is_err());
        config.pipeline.max_sources = MAX_SOURCES;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[pipeline]\nmin_valid_ratio = 0.75\nshortfall_action = \"fail\"\n\n[extraction]\nconcurrency = 2"
        )
        .unwrap();

        let config = AppConfig::load_from(Some(file.path()), "RIPPER_TEST_UNUSED").unwrap();
        assert_eq!(config.pipeline.min_valid_ratio, 0.75);
        assert_eq!(config.pipeline.shortfall_action, ShortfallAction::Fail);
        assert_eq!(config.extraction.concurrency, 2);
        assert_eq!(config.extraction.max_batch_size, 5);
    }

    #[test]
    fn test_storage_layout() {
        let storage = StorageConfig::new("/tmp/ripper");
        assert_eq!(storage.jobs_dir(), PathBuf::from("/tmp/ripper/jobs"));
        assert_eq!(
            storage.transcript_cache_dir(),
            PathBuf::from("/tmp/ripper/cache/transcripts")
        );
    }
}
