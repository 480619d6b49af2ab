//! Prefab Storage - Store Traits, In-Memory Stores, Fast-Tier Caches
//!
//! The durable store traits describe what the gateway persists: spec
//! records, encrypted secrets, access grants, the webhook event ledger
//! and the audit trail. Postgres implementations live in the gateway;
//! the in-memory ones here back tests and the `memory` storage mode.
//!
//! The [`cache`] module holds the Tier-1 byte caches.

pub mod cache;
pub mod error;
pub mod memory;
pub mod traits;

pub use cache::{CacheStats, FastCache, FastTier, LmdbCacheError, LmdbFastCache, LocalFastCache};
pub use error::{StorageError, StorageResult};
pub use memory::{
    MemoryAuditLog, MemoryEventStore, MemoryGrantStore, MemorySecretStore, MemorySpecStore,
    DEFAULT_AUDIT_LIMIT,
};
pub use traits::{AuditLog, EventStore, GrantStore, SecretStore, SpecStore};
