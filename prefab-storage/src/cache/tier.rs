//! Fast-tier selection.
//!
//! The backend is chosen once at construction. A gateway that cannot open
//! LMDB runs on the process-local tier for its whole lifetime instead of
//! re-checking availability on every call.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use super::lmdb_backend::LmdbFastCache;
use super::local::LocalFastCache;
use super::traits::{CacheStats, FastCache};
use crate::error::StorageResult;

pub enum FastTier {
    Lmdb(LmdbFastCache),
    Local(LocalFastCache),
}

impl FastTier {
    /// Open LMDB at `path`, falling back to the local tier when no path is
    /// configured or the environment cannot be opened.
    pub fn open(path: Option<&Path>, max_size_mb: usize) -> Self {
        let Some(path) = path else {
            tracing::info!("No LMDB path configured, using process-local spec cache");
            return FastTier::Local(LocalFastCache::new());
        };
        match LmdbFastCache::open(path, max_size_mb) {
            Ok(cache) => {
                tracing::info!(path = %path.display(), "LMDB spec cache opened");
                FastTier::Lmdb(cache)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "LMDB unavailable, falling back to process-local spec cache"
                );
                FastTier::Local(LocalFastCache::new())
            }
        }
    }

    fn inner(&self) -> &dyn FastCache {
        match self {
            FastTier::Lmdb(c) => c,
            FastTier::Local(c) => c,
        }
    }
}

#[async_trait]
impl FastCache for FastTier {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner().get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StorageResult<()> {
        self.inner().set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.inner().delete(key).await
    }

    async fn stats(&self) -> StorageResult<CacheStats> {
        self.inner().stats().await
    }

    fn backend_name(&self) -> &'static str {
        self.inner().backend_name()
    }
}
