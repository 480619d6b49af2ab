//! Fast-tier (Tier-1) caches.
//!
//! [`FastCache`] is a byte cache with per-entry TTL. Two backends exist:
//! LMDB for a shared memory-mapped store and a process-local `DashMap`.
//! [`FastTier`] picks one at startup.

pub mod lmdb_backend;
pub mod local;
pub mod tier;
pub mod traits;

pub use lmdb_backend::{LmdbCacheError, LmdbFastCache};
pub use local::LocalFastCache;
pub use tier::FastTier;
pub use traits::{CacheStats, FastCache};
