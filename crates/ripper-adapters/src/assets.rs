use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use ripper_core::{AssetStore, JobArtifact, PersistenceError};

/// Writes each finished job into its own directory under `root`.
#[derive(Debug, Clone)]
pub struct FileAssetStore {
    root: PathBuf,
}

impl FileAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{YYYYMMDD_HHMMSS}_{job_id}`
    pub fn asset_id(artifact: &JobArtifact) -> String {
        format!(
            "{}_{}",
            artifact.completed_at.format("%Y%m%d_%H%M%S"),
            artifact.job_id
        )
    }

    async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(value)?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| PersistenceError::io(path, e))
    }
}

#[async_trait]
impl AssetStore for FileAssetStore {
    async fn store(&self, artifact: &JobArtifact) -> Result<String, PersistenceError> {
        let asset_id = Self::asset_id(artifact);
        let dir = self.root.join(&asset_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PersistenceError::io(&dir, e))?;

        Self::write_json(&dir.join("skeletons.json"), &artifact.records).await?;
        Self::write_json(&dir.join("synthesis.json"), &artifact.synthesis).await?;

        let report_path = dir.join("report.md");
        tokio::fs::write(&report_path, &artifact.report)
            .await
            .map_err(|e| PersistenceError::io(&report_path, e))?;

        info!(job_id = %artifact.job_id, asset_id = %asset_id, "Stored job assets");
        Ok(asset_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ripper_core::{
        AggregatedView, AnalysisRequest, JobId, ModelSelection, Platform, SourceRef,
        SynthesisArtifact,
    };

    fn artifact() -> JobArtifact {
        JobArtifact {
            job_id: JobId::new(),
            request: AnalysisRequest::new(
                vec![SourceRef::new(Platform::Instagram, "alice")],
                3,
                ModelSelection::new("local", "llama3"),
            ),
            records: Vec::new(),
            failed_ids: vec!["v9".to_string()],
            coverage: 0.5,
            aggregated: AggregatedView::default(),
            synthesis: SynthesisArtifact {
                analysis: "hooks lead with a question".to_string(),
                templates: Vec::new(),
                quick_wins: vec!["open with a number".to_string()],
                warnings: Vec::new(),
                model_used: "local/llama3".to_string(),
                synthesized_at: Utc::now(),
                attempts: 1,
            },
            report: "# Report\n".to_string(),
            completed_at: Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_store_writes_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAssetStore::new(dir.path());
        let artifact = artifact();

        let asset_id = store.store(&artifact).await.unwrap();
        assert_eq!(asset_id, format!("20240309_140507_{}", artifact.job_id));

        let out = dir.path().join(&asset_id);
        assert_eq!(std::fs::read_to_string(out.join("report.md")).unwrap(), "# Report\n");

        let synthesis: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join("synthesis.json")).unwrap())
                .unwrap();
        assert_eq!(synthesis["quick_wins"][0], "open with a number");

        let skeletons = std::fs::read_to_string(out.join("skeletons.json")).unwrap();
        assert_eq!(skeletons.trim(), "[]");
    }
}
