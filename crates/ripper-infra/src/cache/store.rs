//! Storage backends for the transcript cache.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use ripper_core::{CacheKey, PersistenceError, Platform};

/// Size of a transcript store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
}

/// Write-once key/value storage for validated transcripts.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, PersistenceError>;

    /// Store `transcript` unless the key already exists. Returns whatever
    /// the key maps to afterwards, which is the existing value on conflict.
    async fn insert_if_absent(
        &self,
        key: &CacheKey,
        transcript: &str,
    ) -> Result<String, PersistenceError>;

    async fn remove(&self, key: &CacheKey) -> Result<bool, PersistenceError>;

    /// Remove every entry of one creator. Returns the number removed.
    async fn remove_creator(
        &self,
        platform: Platform,
        creator: &str,
    ) -> Result<usize, PersistenceError>;

    async fn clear(&self) -> Result<usize, PersistenceError>;

    async fn stats(&self) -> Result<CacheStats, PersistenceError>;
}

/// One text file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileTranscriptStore {
    dir: PathBuf,
}

impl FileTranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    async fn entries(&self) -> Result<Vec<(String, PathBuf, u64)>, PersistenceError> {
        let mut out = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(PersistenceError::io(&self.dir, e)),
        };
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| PersistenceError::io(&self.dir, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(".txt") {
                continue;
            }
            let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
            out.push((name, entry.path(), size));
        }
        Ok(out)
    }

    async fn remove_path(path: &Path) -> Result<bool, PersistenceError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PersistenceError::io(path, e)),
        }
    }
}

#[async_trait]
impl TranscriptStore for FileTranscriptStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, PersistenceError> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::io(path, e)),
        }
    }

    async fn insert_if_absent(
        &self,
        key: &CacheKey,
        transcript: &str,
    ) -> Result<String, PersistenceError> {
        if let Some(existing) = self.get(key).await? {
            return Ok(existing);
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PersistenceError::io(&self.dir, e))?;

        let path = self.path_for(key);
        let temp_path = path.with_extension("txt.tmp");
        tokio::fs::write(&temp_path, transcript)
            .await
            .map_err(|e| PersistenceError::io(&temp_path, e))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| PersistenceError::io(&path, e))?;

        debug!(key = %key, "Cached transcript");
        Ok(transcript.to_string())
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool, PersistenceError> {
        Self::remove_path(&self.path_for(key)).await
    }

    async fn remove_creator(
        &self,
        platform: Platform,
        creator: &str,
    ) -> Result<usize, PersistenceError> {
        let prefix = CacheKey::creator_prefix(platform, creator);
        let mut removed = 0;
        for (name, path, _) in self.entries().await? {
            if name.starts_with(&prefix) && Self::remove_path(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<usize, PersistenceError> {
        let mut removed = 0;
        for (_, path, _) in self.entries().await? {
            if Self::remove_path(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn stats(&self) -> Result<CacheStats, PersistenceError> {
        let entries = self.entries().await?;
        Ok(CacheStats {
            entries: entries.len(),
            total_bytes: entries.iter().map(|(_, _, size)| size).sum(),
        })
    }
}

/// In-process store, mainly for tests.
#[derive(Debug, Default)]
pub struct MemoryTranscriptStore {
    entries: RwLock<HashMap<CacheKey, String>>,
}

impl MemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl TranscriptStore for MemoryTranscriptStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, PersistenceError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn insert_if_absent(
        &self,
        key: &CacheKey,
        transcript: &str,
    ) -> Result<String, PersistenceError> {
        let mut entries = self.entries.write();
        Ok(entries
            .entry(key.clone())
            .or_insert_with(|| transcript.to_string())
            .clone())
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool, PersistenceError> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn remove_creator(
        &self,
        platform: Platform,
        creator: &str,
    ) -> Result<usize, PersistenceError> {
        let creator = creator.trim().to_lowercase();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|k, _| !(k.platform == platform && k.creator == creator));
        Ok(before - entries.len())
    }

    async fn clear(&self) -> Result<usize, PersistenceError> {
        let mut entries = self.entries.write();
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }

    async fn stats(&self) -> Result<CacheStats, PersistenceError> {
        let entries = self.entries.read();
        Ok(CacheStats {
            entries: entries.len(),
            total_bytes: entries.values().map(|v| v.len() as u64).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(item: &str) -> CacheKey {
        CacheKey::new(Platform::Instagram, "Alice", item)
    }

    #[tokio::test]
    async fn test_file_store_is_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTranscriptStore::new(dir.path().join("transcripts"));

        assert_eq!(store.get(&key("a")).await.unwrap(), None);
        assert_eq!(store.insert_if_absent(&key("a"), "first").await.unwrap(), "first");
        assert_eq!(store.insert_if_absent(&key("a"), "second").await.unwrap(), "first");
        assert_eq!(store.get(&key("a")).await.unwrap().as_deref(), Some("first"));

        let reopened = FileTranscriptStore::new(dir.path().join("transcripts"));
        assert_eq!(reopened.get(&key("a")).await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_file_store_housekeeping() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTranscriptStore::new(dir.path());
        store.insert_if_absent(&key("a"), "aaaa").await.unwrap();
        store.insert_if_absent(&key("b"), "bb").await.unwrap();
        store
            .insert_if_absent(&CacheKey::new(Platform::Instagram, "bob", "c"), "c")
            .await
            .unwrap();

        assert_eq!(
            store.stats().await.unwrap(),
            CacheStats {
                entries: 3,
                total_bytes: 7
            }
        );
        assert_eq!(store.remove_creator(Platform::Instagram, "alice").await.unwrap(), 2);
        assert!(!store.remove(&key("a")).await.unwrap());
        assert_eq!(store.clear().await.unwrap(), 1);
        assert_eq!(store.stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_memory_store_is_write_once() {
        let store = MemoryTranscriptStore::new();
        store.insert_if_absent(&key("a"), "first").await.unwrap();
        assert_eq!(store.insert_if_absent(&key("a"), "second").await.unwrap(), "first");
        assert_eq!(store.len(), 1);
        assert_eq!(store.remove_creator(Platform::Instagram, "ALICE").await.unwrap(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_remove_creator_matches_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTranscriptStore::new(dir.path());
        let john = CacheKey::new(Platform::Instagram, "john", "1");
        let john_doe = CacheKey::new(Platform::Instagram, "john_doe", "1");
        store.insert_if_absent(&john, "john's").await.unwrap();
        store.insert_if_absent(&john_doe, "john doe's").await.unwrap();

        assert_eq!(store.remove_creator(Platform::Instagram, "john").await.unwrap(), 1);
        assert_eq!(store.get(&john).await.unwrap(), None);
        assert_eq!(store.get(&john_doe).await.unwrap().as_deref(), Some("john doe's"));
    }
}
