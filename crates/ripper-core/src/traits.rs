//! Interfaces implemented by external collaborators.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{FetchError, PersistenceError, ProviderError, ValidationError};
use crate::job::JobArtifact;
use crate::types::{ModelSelection, Platform, SourceItem};

/// Lists raw content items for one creator.
#[async_trait]
pub trait SourceCollaborator: Send + Sync {
    /// Return at most `max_items` items. A `None` transcript means the
    /// fetch/transcribe collaborator must be asked for it.
    async fn list_items(
        &self,
        platform: Platform,
        creator: &str,
        max_items: usize,
    ) -> Result<Vec<SourceItem>, FetchError>;
}

/// Downloads and transcribes a single item.
#[async_trait]
pub trait TranscriptFetcher: Send + Sync {
    async fn fetch_transcript(
        &self,
        platform: Platform,
        creator: &str,
        item_id: &str,
    ) -> Result<String, FetchError>;
}

/// One LLM completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            prompt: prompt.into(),
            temperature: 0.0,
            max_tokens: 4096,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// An LLM backend. Every provider implements this one capability.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider id, e.g. `openai`.
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;
}

/// Maps a model selection to a provider implementation.
pub trait ProviderResolver: Send + Sync {
    fn resolve(&self, selection: &ModelSelection) -> Result<Arc<dyn LlmProvider>, ValidationError>;
}

/// Long-term storage for finished job artifacts.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Store the artifact and return an opaque asset id.
    async fn store(&self, artifact: &JobArtifact) -> Result<String, PersistenceError>;
}
