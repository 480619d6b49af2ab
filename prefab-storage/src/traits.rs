//! Durable store interfaces.
//!
//! Every store is an object-safe async trait so the gateway can hold
//! `Arc<dyn ...>` handles and swap Postgres for the in-memory
//! implementations in tests.

use async_trait::async_trait;
use prefab_core::{
    AccessGrant, AuditEntry, AuditQuery, DeploymentStatus, SecretKey, SecretRecord, SpecDocument,
    SpecKey, Timestamp, TransitionOutcome, UnitSpec, WebhookEvent,
};

use crate::error::StorageResult;

/// Authoritative spec records (Tier-2).
#[async_trait]
pub trait SpecStore: Send + Sync {
    async fn get(&self, key: &SpecKey) -> StorageResult<Option<UnitSpec>>;

    /// Insert a PENDING row for `key`, or overwrite only the interface
    /// columns of the existing one. Deployment status, endpoint, counters
    /// and `deployed_at` are left to whatever is committed.
    ///
    /// `artifact_url` and `source_repo` keep their stored value when `None`.
    async fn publish_document(
        &self,
        key: &SpecKey,
        document: &SpecDocument,
        artifact_url: Option<&str>,
        source_repo: Option<&str>,
        at: Timestamp,
    ) -> StorageResult<UnitSpec>;

    /// Bump `call_count` and `last_called_at`, returning the updated row.
    async fn record_call(&self, key: &SpecKey, at: Timestamp) -> StorageResult<Option<UnitSpec>>;

    /// Apply a deployment transition atomically, creating a placeholder row
    /// when none exists yet.
    async fn apply_transition(
        &self,
        key: &SpecKey,
        target: DeploymentStatus,
        endpoint_url: Option<&str>,
        at: Timestamp,
    ) -> StorageResult<(TransitionOutcome, UnitSpec)>;

    /// Returns whether a row existed.
    async fn delete(&self, key: &SpecKey) -> StorageResult<bool>;

    async fn list(&self, status: Option<DeploymentStatus>) -> StorageResult<Vec<UnitSpec>>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Insert or replace by `(user, unit, name)`. An existing row keeps its
    /// `created_at`.
    async fn upsert(&self, record: SecretRecord) -> StorageResult<()>;

    async fn get_active(&self, key: &SecretKey) -> StorageResult<Option<SecretRecord>>;

    async fn touch(&self, key: &SecretKey, at: Timestamp) -> StorageResult<()>;

    /// Soft delete. Returns whether an active row was disabled.
    async fn disable(&self, key: &SecretKey, at: Timestamp) -> StorageResult<bool>;

    async fn list_active(
        &self,
        user_id: &str,
        unit_id: Option<&str>,
    ) -> StorageResult<Vec<SecretRecord>>;

    /// Rows of any status whose ciphertext was not produced by `key_id`.
    async fn list_not_under_key(&self, key_id: &str) -> StorageResult<Vec<SecretRecord>>;

    /// Swap the ciphertext of `key` only while it still holds `previous`.
    /// Returns false when the row changed or vanished in the meantime.
    async fn replace_ciphertext(
        &self,
        key: &SecretKey,
        previous: &str,
        encrypted_value: &str,
        key_id: &str,
        at: Timestamp,
    ) -> StorageResult<bool>;
}

#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Returns true when the grant is new.
    async fn grant(&self, user_id: &str, resource_uri: &str, at: Timestamp) -> StorageResult<bool>;

    async fn contains(&self, user_id: &str, resource_uri: &str) -> StorageResult<bool>;

    /// Returns whether the grant existed.
    async fn revoke(&self, user_id: &str, resource_uri: &str) -> StorageResult<bool>;

    async fn list(&self, user_id: &str) -> StorageResult<Vec<AccessGrant>>;
}

/// Webhook event ledger. Rows are never deleted.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn get(&self, event_id: &str) -> StorageResult<Option<WebhookEvent>>;

    /// Insert `event` unless its id is already present; returns the stored row.
    async fn insert_if_absent(&self, event: &WebhookEvent) -> StorageResult<WebhookEvent>;

    /// Record `outcome` unless another delivery already did. Returns false
    /// when the event was processed first elsewhere; the stored outcome is
    /// left untouched.
    async fn mark_processed(
        &self,
        event_id: &str,
        at: Timestamp,
        outcome: &serde_json::Value,
    ) -> StorageResult<bool>;

    /// Record `error`, bump `retry_count`, leave the event unprocessed.
    async fn record_failure(&self, event_id: &str, error: &str) -> StorageResult<()>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> StorageResult<()>;

    async fn query(&self, query: &AuditQuery) -> StorageResult<Vec<AuditEntry>>;
}
