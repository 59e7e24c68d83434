//! Application state and initialization

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use ripper_adapters::{FileAssetStore, ProviderRegistry, ScraperClient};
use ripper_core::AppConfig;
use ripper_infra::{FileJobStore, FileTranscriptStore, TranscriptCache, TranscriptValidator};
use ripper_workflow::{JobOrchestrator, Services};

use crate::cli::Args;
use crate::server::Server;

/// Finished jobs are kept this long.
const FINISHED_JOB_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: JobOrchestrator,
    pub registry: Arc<ProviderRegistry>,
}

impl AppState {
    /// Wire collaborators and reload persisted jobs.
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!(data_dir = %config.storage.data_dir.display(), "Initializing application components");

        let http = reqwest::Client::builder()
            .user_agent(concat!("ripper-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let registry = Arc::new(ProviderRegistry::from_config(&config.providers, http.clone()));
        let scraper = Arc::new(
            ScraperClient::new(config.fetch.scraper_base_url.clone(), http)
                .with_timeout(config.fetch.call_timeout()),
        );
        let cache = Arc::new(TranscriptCache::new(
            Arc::new(FileTranscriptStore::new(config.storage.transcript_cache_dir())),
            TranscriptValidator::new(config.transcript.clone()),
        ));

        let services = Services {
            source: scraper.clone(),
            fetcher: scraper,
            providers: registry.clone(),
            assets: Arc::new(FileAssetStore::new(config.storage.output_dir())),
            cache,
        };
        let repo = Arc::new(FileJobStore::new(config.storage.jobs_dir()));
        let orchestrator = JobOrchestrator::open(config, repo, services)
            .await
            .context("Failed to load job records")?;

        Ok(Self {
            orchestrator,
            registry,
        })
    }
}

/// Main application
pub struct App {
    config: AppConfig,
    state: AppState,
}

impl App {
    pub async fn build(args: &Args) -> Result<Self> {
        let mut config =
            AppConfig::load_from(args.config.as_deref(), "RIPPER").context("Failed to load configuration")?;
        args.apply(&mut config);
        config.validate().context("Invalid configuration")?;

        let state = AppState::new(config.clone()).await?;
        Ok(Self { config, state })
    }

    pub async fn run(self) -> Result<()> {
        let orchestrator = self.state.orchestrator.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = orchestrator.cleanup_finished(FINISHED_JOB_TTL).await {
                    warn!(error = %e, "Job cleanup failed");
                }
            }
        });

        Server::new(&self.config.server, self.state)?.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripper_core::StorageConfig;

    #[tokio::test]
    async fn test_app_state_creation() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            storage: StorageConfig::new(dir.path()),
            ..AppConfig::default()
        };

        let state = AppState::new(config).await.unwrap();
        assert!(state.orchestrator.list_recent(10).await.is_empty());
        assert_eq!(state.registry.providers().len(), 4);
    }
}
