//! Fast-tier cache interface.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageResult;

/// Volatile, TTL-bound byte cache (Tier-1).
///
/// A miss or an error here says nothing about whether the record exists;
/// callers must consult the durable store.
#[async_trait]
pub trait FastCache: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StorageResult<()>;

    /// Returns whether an entry was removed.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    async fn stats(&self) -> StorageResult<CacheStats>;

    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
    /// Entries dropped because their TTL had passed.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
