//! Concrete collaborators for the ripper: LLM provider clients, the scraper
//! service client and the filesystem asset store.

pub mod assets;
pub mod llm;
pub mod scraper;

pub use assets::FileAssetStore;
pub use llm::{
    AnthropicProvider, CostTier, GeminiProvider, ModelInfo, OllamaProvider, OpenAiProvider,
    ProviderInfo, ProviderRegistry,
};
pub use scraper::ScraperClient;
