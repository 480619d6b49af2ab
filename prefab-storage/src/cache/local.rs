//! Process-local fast tier used when LMDB cannot be opened.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{CacheStats, FastCache};
use crate::error::StorageResult;

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

#[derive(Default)]
pub struct LocalFastCache {
    entries: DashMap<String, Entry>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl LocalFastCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }
}

#[async_trait]
impl FastCache for LocalFastCache {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let live = self
            .entries
            .get(key)
            .map(|e| (e.expires_at > now).then(|| e.value.clone()));

        match live {
            Some(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            Some(None) => {
                self.entries.remove_if(key, |_, e| e.expires_at <= now);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StorageResult<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn stats(&self) -> StorageResult<CacheStats> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
            expirations: self.expirations.load(Ordering::Relaxed),
        })
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_and_stats() {
        let cache = LocalFastCache::new();
        assert_eq!(cache.get("k").await.unwrap(), None);
        cache.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some(&b"v"[..]));

        let stats = cache.stats().await.unwrap();
        assert_eq!((stats.hits, stats.misses, stats.entry_count), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_zero_ttl_expires_immediately() {
        let cache = LocalFastCache::new();
        cache.set("k", b"v", Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert_eq!(cache.stats().await.unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let cache = LocalFastCache::new();
        cache.set("old", b"v", Duration::ZERO).await.unwrap();
        cache.set("new", b"v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.delete("new").await.unwrap());
    }
}
