//! LMDB-backed fast tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) as a memory-mapped
//! key-value store shared by every worker in the process.
//!
//! # Value layout
//!
//! `[expires_at: 8 bytes, little-endian unix millis][payload]`
//!
//! Expired entries are treated as misses and removed lazily on read.

use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};

use super::traits::{CacheStats, FastCache};
use crate::error::{StorageError, StorageResult};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Corrupt entry for key {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for StorageError {
    fn from(e: LmdbCacheError) -> Self {
        StorageError::Unavailable(e.to_string())
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

const HEADER_LEN: usize = 8;

pub struct LmdbFastCache {
    env: Env,
    db: Database<Str, Bytes>,
    stats: RwLock<CacheStats>,
}

impl LmdbFastCache {
    /// Open (or create) the environment under `path`.
    ///
    /// `max_size_mb` bounds the memory map.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Str, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            db,
            stats: RwLock::new(CacheStats::default()),
        })
    }

    fn bump(&self, f: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }

    fn remove(&self, key: &str) -> Result<bool, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let deleted = self.db.delete(&mut wtxn, key).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, LmdbCacheError> {
        let now_ms = Utc::now().timestamp_millis();
        let expired = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            let Some(bytes) = self.db.get(&rtxn, key).map_err(txn_err)? else {
                self.bump(|s| s.misses += 1);
                return Ok(None);
            };
            if bytes.len() < HEADER_LEN {
                return Err(LmdbCacheError::Corrupt(key.to_string()));
            }
            let mut header = [0u8; HEADER_LEN];
            header.copy_from_slice(&bytes[..HEADER_LEN]);
            let expires_at = i64::from_le_bytes(header);
            if expires_at > now_ms {
                self.bump(|s| s.hits += 1);
                return Ok(Some(bytes[HEADER_LEN..].to_vec()));
            }
            true
        };

        if expired && self.remove(key)? {
            self.bump(|s| {
                s.misses += 1;
                s.expirations += 1;
                s.entry_count = s.entry_count.saturating_sub(1);
            });
        }
        Ok(None)
    }

    fn write(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), LmdbCacheError> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_ms);

        let mut full = Vec::with_capacity(HEADER_LEN + value.len());
        full.extend_from_slice(&expires_at.to_le_bytes());
        full.extend_from_slice(value);

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let is_new = self.db.get(&wtxn, key).map_err(txn_err)?.is_none();
        self.db.put(&mut wtxn, key, &full).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        if is_new {
            self.bump(|s| s.entry_count += 1);
        }
        Ok(())
    }
}

#[async_trait]
impl FastCache for LmdbFastCache {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.read(key)?)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StorageResult<()> {
        Ok(self.write(key, value, ttl)?)
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let deleted = self.remove(key)?;
        if deleted {
            self.bump(|s| s.entry_count = s.entry_count.saturating_sub(1));
        }
        Ok(deleted)
    }

    async fn stats(&self) -> StorageResult<CacheStats> {
        self.stats
            .read()
            .map(|s| s.clone())
            .map_err(|_| StorageError::Unavailable("cache stats lock poisoned".to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "lmdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_backend() -> (LmdbFastCache, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend =
            LmdbFastCache::open(temp_dir.path(), 10).expect("backend creation should succeed");
        (backend, temp_dir)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (cache, _dir) = create_test_backend();
        cache
            .set("spec:weather-api:1.0.0", b"{\"name\":\"weather\"}", Duration::from_secs(60))
            .await
            .unwrap();

        let got = cache.get("spec:weather-api:1.0.0").await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"{\"name\":\"weather\"}"[..]));

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let (cache, _dir) = create_test_backend();
        cache.set("k", b"v", Duration::ZERO).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), None);
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let (cache, _dir) = create_test_backend();
        cache.set("k", b"v", Duration::from_secs(60)).await.unwrap();

        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_single_entry() {
        let (cache, _dir) = create_test_backend();
        cache.set("k", b"one", Duration::from_secs(60)).await.unwrap();
        cache.set("k", b"two", Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some(&b"two"[..]));
        assert_eq!(cache.stats().await.unwrap().entry_count, 1);
    }
}
