//! One JSON document per job, rewritten atomically on every change.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use ripper_core::{JobId, JobRecord, PersistenceError};

/// Durable storage for job records.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Replace the stored record. Readers see either the previous or the new
    /// document, never a partial one.
    async fn save(&self, record: &JobRecord) -> Result<(), PersistenceError>;

    async fn load(&self, id: JobId) -> Result<Option<JobRecord>, PersistenceError>;

    /// Every readable record. Unreadable documents are skipped.
    async fn load_all(&self) -> Result<Vec<JobRecord>, PersistenceError>;

    async fn delete(&self, id: JobId) -> Result<bool, PersistenceError>;
}

/// Job records as `{dir}/{job_id}.json`.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: JobId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn read_record(path: &Path) -> Result<Option<JobRecord>, PersistenceError> {
        let json = match tokio::fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistenceError::io(path, e)),
        };
        Ok(Some(serde_json::from_str(&json)?))
    }
}

#[async_trait]
impl JobRepository for FileJobStore {
    async fn save(&self, record: &JobRecord) -> Result<(), PersistenceError> {
        let path = self.path_for(record.id);
        let json = serde_json::to_string_pretty(record)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PersistenceError::io(&self.dir, e))?;

        // Write atomically using a temp file
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &json)
            .await
            .map_err(|e| PersistenceError::io(&temp_path, e))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| PersistenceError::io(&path, e))?;

        debug!(job_id = %record.id, phase = %record.phase, "Persisted job record");
        Ok(())
    }

    async fn load(&self, id: JobId) -> Result<Option<JobRecord>, PersistenceError> {
        Self::read_record(&self.path_for(id)).await
    }

    async fn load_all(&self) -> Result<Vec<JobRecord>, PersistenceError> {
        let mut records = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(PersistenceError::io(&self.dir, e)),
        };

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| PersistenceError::io(&self.dir, e))?
        {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();

            if name.ends_with(".tmp") {
                // Left behind by a write that never reached its rename.
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to remove stale temp file");
                }
                continue;
            }
            if !name.ends_with(".json") {
                continue;
            }

            match Self::read_record(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable job record"),
            }
        }

        info!(count = records.len(), dir = %self.dir.display(), "Loaded job records");
        Ok(records)
    }

    async fn delete(&self, id: JobId) -> Result<bool, PersistenceError> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PersistenceError::io(path, e)),
        }
    }
}
