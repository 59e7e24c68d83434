//! Provider catalogue and model selection resolution.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use ripper_core::{LlmProvider, ModelSelection, ProviderResolver, ProvidersConfig, ValidationError};

use super::{AnthropicProvider, GeminiProvider, OllamaProvider, OpenAiProvider};

/// Rough price band shown to users picking a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    Free,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub cost_tier: CostTier,
}

/// What `GET /api/providers` reports per provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub models: Vec<ModelInfo>,
}

struct CatalogueEntry {
    id: &'static str,
    name: &'static str,
    models: &'static [(&'static str, &'static str, CostTier)],
}

const CATALOGUE: &[CatalogueEntry] = &[
    CatalogueEntry {
        id: "openai",
        name: "OpenAI",
        models: &[
            ("gpt-4o-mini", "GPT-4o Mini", CostTier::Low),
            ("gpt-4o", "GPT-4o", CostTier::Medium),
            ("gpt-4-turbo", "GPT-4 Turbo", CostTier::High),
        ],
    },
    CatalogueEntry {
        id: "anthropic",
        name: "Anthropic",
        models: &[
            ("claude-3-haiku-20240307", "Claude 3 Haiku", CostTier::Low),
            ("claude-3-sonnet-20240229", "Claude 3 Sonnet", CostTier::Medium),
            ("claude-3-opus-20240229", "Claude 3 Opus", CostTier::High),
        ],
    },
    CatalogueEntry {
        id: "google",
        name: "Google Gemini",
        models: &[
            ("gemini-1.5-flash", "Gemini 1.5 Flash", CostTier::Low),
            ("gemini-1.5-pro", "Gemini 1.5 Pro", CostTier::Medium),
        ],
    },
    CatalogueEntry {
        id: "local",
        name: "Local (Ollama)",
        models: &[
            ("llama3", "Llama 3", CostTier::Free),
            ("llama3.1", "Llama 3.1", CostTier::Free),
            ("mistral", "Mistral", CostTier::Free),
            ("mixtral", "Mixtral", CostTier::Free),
            ("phi3", "Phi-3", CostTier::Free),
        ],
    },
];

/// Registry of configured providers.
///
/// Providers without credentials stay in the catalogue as unavailable so the
/// UI can list them, but resolving them fails before a job is created.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn LlmProvider>>>,
    unavailable: RwLock<HashMap<String, String>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            unavailable: RwLock::new(HashMap::new()),
        }
    }

    /// Build the registry from configuration, sharing one HTTP client.
    pub fn from_config(config: &ProvidersConfig, http: reqwest::Client) -> Self {
        let registry = Self::new();

        match config.openai.api_key.as_deref().filter(|_| config.openai.has_key()) {
            Some(key) => {
                let mut provider = OpenAiProvider::new(key, http.clone());
                if let Some(url) = &config.openai.base_url {
                    provider = provider.with_base_url(url);
                }
                registry.register(Arc::new(provider));
            }
            None => registry.mark_unavailable("openai", "OPENAI_API_KEY is not set"),
        }

        match config
            .anthropic
            .api_key
            .as_deref()
            .filter(|_| config.anthropic.has_key())
        {
            Some(key) => {
                let mut provider = AnthropicProvider::new(key, http.clone());
                if let Some(url) = &config.anthropic.base_url {
                    provider = provider.with_base_url(url);
                }
                registry.register(Arc::new(provider));
            }
            None => registry.mark_unavailable("anthropic", "ANTHROPIC_API_KEY is not set"),
        }

        match config.google.api_key.as_deref().filter(|_| config.google.has_key()) {
            Some(key) => {
                let mut provider = GeminiProvider::new(key, http.clone());
                if let Some(url) = &config.google.base_url {
                    provider = provider.with_base_url(url);
                }
                registry.register(Arc::new(provider));
            }
            None => registry.mark_unavailable("google", "GOOGLE_API_KEY is not set"),
        }

        registry.register(Arc::new(
            OllamaProvider::new(http).with_base_url(&config.ollama_url),
        ));

        registry
    }

    /// Register a provider under its own name.
    pub fn register(&self, provider: Arc<dyn LlmProvider>) {
        let id = provider.name().to_string();
        info!(provider = %id, "Registering LLM provider");
        self.unavailable.write().remove(&id);
        self.providers.write().insert(id, provider);
    }

    pub fn mark_unavailable(&self, id: &str, reason: impl Into<String>) {
        self.unavailable.write().insert(id.to_string(), reason.into());
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.read().get(id).cloned()
    }

    /// Catalogue entries with their current availability.
    pub fn providers(&self) -> Vec<ProviderInfo> {
        let providers = self.providers.read();
        let unavailable = self.unavailable.read();

        CATALOGUE
            .iter()
            .map(|entry| {
                let available = providers.contains_key(entry.id);
                ProviderInfo {
                    id: entry.id.to_string(),
                    name: entry.name.to_string(),
                    available,
                    reason: if available {
                        None
                    } else {
                        Some(
                            unavailable
                                .get(entry.id)
                                .cloned()
                                .unwrap_or_else(|| "not configured".to_string()),
                        )
                    },
                    models: entry
                        .models
                        .iter()
                        .map(|(id, name, cost_tier)| ModelInfo {
                            id: id.to_string(),
                            name: name.to_string(),
                            cost_tier: *cost_tier,
                        })
                        .collect(),
                }
            })
            .collect()
    }

    fn is_known(&self, id: &str) -> bool {
        CATALOGUE.iter().any(|entry| entry.id == id) || self.providers.read().contains_key(id)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderResolver for ProviderRegistry {
    fn resolve(&self, selection: &ModelSelection) -> Result<Arc<dyn LlmProvider>, ValidationError> {
        let id = selection.provider.as_str();
        if let Some(provider) = self.get(id) {
            return Ok(provider);
        }
        if !self.is_known(id) {
            return Err(ValidationError::UnknownProvider(id.to_string()));
        }
        let reason = self
            .unavailable
            .read()
            .get(id)
            .cloned()
            .unwrap_or_else(|| "not configured".to_string());
        Err(ValidationError::ProviderUnavailable {
            provider: id.to_string(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripper_core::ProviderEndpoint;

    fn config_with_openai() -> ProvidersConfig {
        ProvidersConfig {
            openai: ProviderEndpoint {
                api_key: Some("sk-test".to_string()),
                base_url: None,
            },
            ..ProvidersConfig::default()
        }
    }

    #[test]
    fn test_resolve_configured_provider() {
        let registry = ProviderRegistry::from_config(&config_with_openai(), reqwest::Client::new());
        let provider = registry
            .resolve(&ModelSelection::new("openai", "gpt-4o-mini"))
            .unwrap();
        assert_eq!(provider.name(), "openai");

        let local = registry
            .resolve(&ModelSelection::new("local", "llama3"))
            .unwrap();
        assert_eq!(local.name(), "local");
    }

    #[test]
    fn test_missing_key_is_unavailable() {
        let registry = ProviderRegistry::from_config(&config_with_openai(), reqwest::Client::new());
        let err = registry
            .resolve(&ModelSelection::new("anthropic", "claude-3-haiku-20240307"))
            .err()
            .unwrap();
        assert!(matches!(err, ValidationError::ProviderUnavailable { ref provider, .. } if provider == "anthropic"));
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::new();
        let err = registry
            .resolve(&ModelSelection::new("mystery", "m"))
            .err()
            .unwrap();
        assert_eq!(err, ValidationError::UnknownProvider("mystery".to_string()));
    }

    #[test]
    fn test_catalogue_listing() {
        let registry = ProviderRegistry::from_config(&config_with_openai(), reqwest::Client::new());
        let providers = registry.providers();

        let ids: Vec<_> = providers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["openai", "anthropic", "google", "local"]);

        let google = providers.iter().find(|p| p.id == "google").unwrap();
        assert!(!google.available);
        assert_eq!(google.reason.as_deref(), Some("GOOGLE_API_KEY is not set"));

        let local = providers.iter().find(|p| p.id == "local").unwrap();
        assert!(local.available);
        assert!(local.models.iter().all(|m| m.cost_tier == CostTier::Free));
    }
}
