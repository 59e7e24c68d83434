//! Content-addressed transcript cache.
//!
//! Only transcript text lives here. Views and likes change over time and are
//! always re-read from the source collaborator, so they are never cached.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use ripper_core::{CacheKey, PersistenceError, Platform};

use super::store::{CacheStats, TranscriptStore};
use super::validation::{TranscriptValidator, TranscriptVerdict};

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptLookup {
    pub transcript: String,
    pub from_cache: bool,
    pub verdict: TranscriptVerdict,
}

impl TranscriptLookup {
    pub fn is_valid(&self) -> bool {
        self.verdict.is_valid()
    }
}

/// Write-once transcript cache in front of a fetch function.
pub struct TranscriptCache {
    store: Arc<dyn TranscriptStore>,
    validator: TranscriptValidator,
    inflight: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl TranscriptCache {
    pub fn new(store: Arc<dyn TranscriptStore>, validator: TranscriptValidator) -> Self {
        Self {
            store,
            validator,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn validator(&self) -> &TranscriptValidator {
        &self.validator
    }

    /// Return the cached transcript for `key`, or invoke `fetch` and cache
    /// its result if it passes validation.
    ///
    /// Invalid transcripts are handed back to the caller for this call only.
    /// Concurrent calls for the same key share one fetch.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &CacheKey,
        fetch: F,
    ) -> Result<TranscriptLookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let lock = self.key_lock(key);
        let result = {
            let _guard = lock.lock().await;
            self.resolve(key, fetch).await
        };
        self.release_key(key, &lock);
        result
    }

    async fn resolve<F, Fut, E>(&self, key: &CacheKey, fetch: F) -> Result<TranscriptLookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        if let Some(transcript) = self.get(key).await {
            debug!(key = %key, "Transcript cache hit");
            return Ok(TranscriptLookup {
                transcript,
                from_cache: true,
                verdict: TranscriptVerdict::Valid,
            });
        }

        let fetched = fetch().await?;
        let verdict = self.validator.check(&fetched);
        if !verdict.is_valid() {
            debug!(key = %key, reason = %verdict, "Transcript rejected, not caching");
            return Ok(TranscriptLookup {
                transcript: fetched,
                from_cache: false,
                verdict,
            });
        }

        let transcript = match self.store.insert_if_absent(key, &fetched).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to cache transcript");
                fetched
            }
        };

        Ok(TranscriptLookup {
            transcript,
            from_cache: false,
            verdict,
        })
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<tokio::sync::Mutex<()>> {
        self.inflight
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release_key(&self, key: &CacheKey, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut inflight = self.inflight.lock();
        let idle = inflight
            .get(key)
            .is_some_and(|held| Arc::ptr_eq(held, lock) && Arc::strong_count(held) <= 2);
        if idle {
            inflight.remove(key);
        }
    }

    /// Cached transcript for `key`. Read failures count as a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<String> {
        match self.store.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key = %key, error = %e, "Transcript cache read failed");
                None
            }
        }
    }

    pub async fn contains(&self, key: &CacheKey) -> bool {
        self.get(key).await.is_some()
    }

    pub async fn remove(&self, key: &CacheKey) -> Result<bool, PersistenceError> {
        self.store.remove(key).await
    }

    pub async fn clear_creator(
        &self,
        platform: Platform,
        creator: &str,
    ) -> Result<usize, PersistenceError> {
        self.store.remove_creator(platform, creator).await
    }

    pub async fn clear_all(&self) -> Result<usize, PersistenceError> {
        self.store.clear().await
    }

    pub async fn stats(&self) -> Result<CacheStats, PersistenceError> {
        self.store.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::{FileTranscriptStore, MemoryTranscriptStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const GOOD: &str = "here are three things nobody tells you about building a content \
                        system that actually compounds over time";

    fn cache() -> TranscriptCache {
        TranscriptCache::new(
            Arc::new(MemoryTranscriptStore::new()),
            TranscriptValidator::default(),
        )
    }

    fn key() -> CacheKey {
        CacheKey::new(Platform::Instagram, "alice", "v1")
    }

    #[tokio::test]
    async fn test_second_lookup_never_fetches() {
        let cache = cache();
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_fetch(&key(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(GOOD.to_string())
            })
            .await
            .unwrap();
        assert!(!first.from_cache);

        let second = cache
            .get_or_fetch(&key(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>("fetch must not run again".to_string())
            })
            .await
            .unwrap();

        assert!(second.from_cache);
        assert_eq!(second.transcript, GOOD);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_transcripts_are_not_cached() {
        let cache = cache();
        let lookup = cache
            .get_or_fetch(&key(), || async { Ok::<_, String>("too short".to_string()) })
            .await
            .unwrap();

        assert!(!lookup.is_valid());
        assert_eq!(lookup.transcript, "too short");
        assert!(!cache.contains(&key()).await);
    }

    #[tokio::test]
    async fn test_fetch_errors_propagate() {
        let cache = cache();
        let result = cache
            .get_or_fetch(&key(), || async { Err::<String, _>("unavailable") })
            .await;
        assert_eq!(result, Err("unavailable"));
        assert!(!cache.contains(&key()).await);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_fetch() {
        let cache = Arc::new(cache());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(&key(), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, String>(GOOD.to_string())
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().transcript, GOOD);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.inflight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_file_backed_cache_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let open = || {
            TranscriptCache::new(
                Arc::new(FileTranscriptStore::new(dir.path())),
                TranscriptValidator::default(),
            )
        };

        open()
            .get_or_fetch(&key(), || async { Ok::<_, String>(GOOD.to_string()) })
            .await
            .unwrap();

        let reopened = open();
        let lookup = reopened
            .get_or_fetch(&key(), || async { Err::<String, _>("offline".to_string()) })
            .await
            .unwrap();
        assert!(lookup.from_cache);
        assert_eq!(reopened.stats().await.unwrap().entries, 1);
        assert_eq!(reopened.clear_creator(Platform::Instagram, "alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_underscored_creators_keep_their_own_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TranscriptCache::new(
            Arc::new(FileTranscriptStore::new(dir.path())),
            TranscriptValidator::default(),
        );
        let first = CacheKey::new(Platform::Instagram, "a_b", "c");
        let second = CacheKey::new(Platform::Instagram, "a", "b_c");
        let other = format!("{} for a different creator", GOOD);
        let calls = AtomicUsize::new(0);

        cache
            .get_or_fetch(&first, || async { Ok::<_, String>(GOOD.to_string()) })
            .await
            .unwrap();
        let lookup = cache
            .get_or_fetch(&second, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(other.clone())
            })
            .await
            .unwrap();

        assert!(!lookup.from_cache);
        assert_eq!(lookup.transcript, other);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().await.unwrap().entries, 2);
    }
}
