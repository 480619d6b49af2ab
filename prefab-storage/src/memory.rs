//! In-memory store implementations.
//!
//! Back the gateway in `memory` storage mode and every test. Each store
//! guards its map with a `tokio::sync::RwLock`.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use prefab_core::{
    AccessGrant, AuditEntry, AuditQuery, DeploymentStatus, SecretKey, SecretRecord, SecretStatus,
    SpecDocument, SpecKey, Timestamp, TransitionOutcome, UnitSpec, WebhookEvent,
};
use tokio::sync::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::traits::{AuditLog, EventStore, GrantStore, SecretStore, SpecStore};

// ============================================================================
// SPECS
// ============================================================================

#[derive(Default)]
pub struct MemorySpecStore {
    specs: RwLock<BTreeMap<SpecKey, UnitSpec>>,
}

impl MemorySpecStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.specs.read().await.len()
    }
}

#[async_trait]
impl SpecStore for MemorySpecStore {
    async fn get(&self, key: &SpecKey) -> StorageResult<Option<UnitSpec>> {
        Ok(self.specs.read().await.get(key).cloned())
    }

    async fn publish_document(
        &self,
        key: &SpecKey,
        document: &SpecDocument,
        artifact_url: Option<&str>,
        source_repo: Option<&str>,
        at: Timestamp,
    ) -> StorageResult<UnitSpec> {
        let mut specs = self.specs.write().await;
        let spec = match specs.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let existing = entry.into_mut();
                existing.replace_document(document.clone(), at);
                existing
            }
            Entry::Vacant(entry) => {
                entry.insert(UnitSpec::from_document(key.clone(), document.clone(), at))
            }
        };
        if let Some(url) = artifact_url {
            spec.artifact_url = Some(url.to_string());
        }
        if let Some(repo) = source_repo {
            spec.source_repo = Some(repo.to_string());
        }
        Ok(spec.clone())
    }

    async fn record_call(&self, key: &SpecKey, at: Timestamp) -> StorageResult<Option<UnitSpec>> {
        let mut specs = self.specs.write().await;
        Ok(specs.get_mut(key).map(|spec| {
            spec.record_call(at);
            spec.clone()
        }))
    }

    async fn apply_transition(
        &self,
        key: &SpecKey,
        target: DeploymentStatus,
        endpoint_url: Option<&str>,
        at: Timestamp,
    ) -> StorageResult<(TransitionOutcome, UnitSpec)> {
        let mut specs = self.specs.write().await;
        let spec = specs
            .entry(key.clone())
            .or_insert_with(|| UnitSpec::placeholder(key.clone(), at));
        let outcome = spec.apply_transition(target, endpoint_url, at);
        Ok((outcome, spec.clone()))
    }

    async fn delete(&self, key: &SpecKey) -> StorageResult<bool> {
        Ok(self.specs.write().await.remove(key).is_some())
    }

    async fn list(&self, status: Option<DeploymentStatus>) -> StorageResult<Vec<UnitSpec>> {
        let specs = self.specs.read().await;
        Ok(specs
            .values()
            .filter(|s| status.map_or(true, |st| s.deployment_status == st))
            .cloned()
            .collect())
    }
}

// ============================================================================
// SECRETS
// ============================================================================

#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<BTreeMap<SecretKey, SecretRecord>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw row regardless of status. Lets tests inspect ciphertext and
    /// soft-deleted rows.
    pub async fn raw(&self, key: &SecretKey) -> Option<SecretRecord> {
        self.secrets.read().await.get(key).cloned()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn upsert(&self, mut record: SecretRecord) -> StorageResult<()> {
        let mut secrets = self.secrets.write().await;
        let key = record.key();
        if let Some(existing) = secrets.get(&key) {
            record.created_at = existing.created_at;
        }
        secrets.insert(key, record);
        Ok(())
    }

    async fn get_active(&self, key: &SecretKey) -> StorageResult<Option<SecretRecord>> {
        let secrets = self.secrets.read().await;
        Ok(secrets
            .get(key)
            .filter(|r| r.status == SecretStatus::Active)
            .cloned())
    }

    async fn touch(&self, key: &SecretKey, at: Timestamp) -> StorageResult<()> {
        if let Some(record) = self.secrets.write().await.get_mut(key) {
            record.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn disable(&self, key: &SecretKey, at: Timestamp) -> StorageResult<bool> {
        let mut secrets = self.secrets.write().await;
        match secrets.get_mut(key) {
            Some(record) if record.status == SecretStatus::Active => {
                record.status = SecretStatus::Disabled;
                record.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_active(
        &self,
        user_id: &str,
        unit_id: Option<&str>,
    ) -> StorageResult<Vec<SecretRecord>> {
        let secrets = self.secrets.read().await;
        Ok(secrets
            .values()
            .filter(|r| r.user_id == user_id && r.status == SecretStatus::Active)
            .filter(|r| unit_id.map_or(true, |u| r.unit_id == u))
            .cloned()
            .collect())
    }

    async fn list_not_under_key(&self, key_id: &str) -> StorageResult<Vec<SecretRecord>> {
        let secrets = self.secrets.read().await;
        Ok(secrets
            .values()
            .filter(|r| r.encryption_key_id != key_id)
            .cloned()
            .collect())
    }

    async fn replace_ciphertext(
        &self,
        key: &SecretKey,
        previous: &str,
        encrypted_value: &str,
        key_id: &str,
        at: Timestamp,
    ) -> StorageResult<bool> {
        let mut secrets = self.secrets.write().await;
        match secrets.get_mut(key) {
            Some(record) if record.encrypted_value == previous => {
                record.encrypted_value = encrypted_value.to_string();
                record.encryption_key_id = key_id.to_string();
                record.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ============================================================================
// GRANTS
// ============================================================================

#[derive(Default)]
pub struct MemoryGrantStore {
    grants: RwLock<HashMap<String, BTreeMap<String, Timestamp>>>,
}

impl MemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GrantStore for MemoryGrantStore {
    async fn grant(&self, user_id: &str, resource_uri: &str, at: Timestamp) -> StorageResult<bool> {
        let mut grants = self.grants.write().await;
        let owned = grants.entry(user_id.to_string()).or_default();
        if owned.contains_key(resource_uri) {
            return Ok(false);
        }
        owned.insert(resource_uri.to_string(), at);
        Ok(true)
    }

    async fn contains(&self, user_id: &str, resource_uri: &str) -> StorageResult<bool> {
        let grants = self.grants.read().await;
        Ok(grants
            .get(user_id)
            .is_some_and(|owned| owned.contains_key(resource_uri)))
    }

    async fn revoke(&self, user_id: &str, resource_uri: &str) -> StorageResult<bool> {
        let mut grants = self.grants.write().await;
        let Some(owned) = grants.get_mut(user_id) else {
            return Ok(false);
        };
        let existed = owned.remove(resource_uri).is_some();
        if owned.is_empty() {
            grants.remove(user_id);
        }
        Ok(existed)
    }

    async fn list(&self, user_id: &str) -> StorageResult<Vec<AccessGrant>> {
        let grants = self.grants.read().await;
        Ok(grants
            .get(user_id)
            .map(|owned| {
                owned
                    .iter()
                    .map(|(uri, at)| AccessGrant {
                        user_id: user_id.to_string(),
                        resource_uri: uri.clone(),
                        granted_at: *at,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ============================================================================
// WEBHOOK EVENTS
// ============================================================================

#[derive(Default)]
pub struct MemoryEventStore {
    events: RwLock<HashMap<String, WebhookEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    fn missing(event_id: &str) -> StorageError {
        StorageError::NotFound {
            entity: "webhook event",
            key: event_id.to_string(),
        }
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn get(&self, event_id: &str) -> StorageResult<Option<WebhookEvent>> {
        Ok(self.events.read().await.get(event_id).cloned())
    }

    async fn insert_if_absent(&self, event: &WebhookEvent) -> StorageResult<WebhookEvent> {
        let mut events = self.events.write().await;
        Ok(events
            .entry(event.event_id.clone())
            .or_insert_with(|| event.clone())
            .clone())
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        at: Timestamp,
        outcome: &serde_json::Value,
    ) -> StorageResult<bool> {
        let mut events = self.events.write().await;
        let event = events.get_mut(event_id).ok_or_else(|| Self::missing(event_id))?;
        if event.processed {
            return Ok(false);
        }
        event.processed = true;
        event.processed_at = Some(at);
        event.processing_error = None;
        event.outcome = Some(outcome.clone());
        Ok(true)
    }

    async fn record_failure(&self, event_id: &str, error: &str) -> StorageResult<()> {
        let mut events = self.events.write().await;
        let event = events.get_mut(event_id).ok_or_else(|| Self::missing(event_id))?;
        event.retry_count += 1;
        event.processing_error = Some(error.to_string());
        Ok(())
    }
}

// ============================================================================
// AUDIT
// ============================================================================

#[derive(Default)]
pub struct MemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Default page size for audit reads.
pub const DEFAULT_AUDIT_LIMIT: usize = 100;

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, entry: &AuditEntry) -> StorageResult<()> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> StorageResult<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .rev()
            .filter(|e| query.user_id.as_ref().map_or(true, |u| e.user_id.as_ref() == Some(u)))
            .filter(|e| query.action.as_ref().map_or(true, |a| &e.action == a))
            .take(query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use prefab_core::{SpecDocument, WebhookPayload};
    use serde_json::json;

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn record(user: &str, unit: &str, name: &str, key_id: &str) -> SecretRecord {
        SecretRecord {
            user_id: user.to_string(),
            unit_id: unit.to_string(),
            secret_name: name.to_string(),
            encrypted_value: "enc:v1:test".to_string(),
            encryption_key_id: key_id.to_string(),
            description: None,
            status: SecretStatus::Active,
            created_at: t0(),
            updated_at: t0(),
            last_used_at: None,
        }
    }

    #[tokio::test]
    async fn test_spec_transition_creates_placeholder() {
        let store = MemorySpecStore::new();
        let key = SpecKey::new("weather-api", "1.0.0");
        let (outcome, spec) = store
            .apply_transition(&key, DeploymentStatus::Building, None, t0())
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Applied { .. }));
        assert_eq!(spec.name, "weather-api");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_spec_list_filters_by_status() {
        let store = MemorySpecStore::new();
        let doc = SpecDocument {
            name: "Weather".to_string(),
            description: String::new(),
            functions: vec![],
        };
        store
            .publish_document(&SpecKey::new("a", "1"), &doc, None, None, t0())
            .await
            .unwrap();
        store
            .apply_transition(&SpecKey::new("b", "1"), DeploymentStatus::Deployed, None, t0())
            .await
            .unwrap();

        assert_eq!(store.list(None).await.unwrap().len(), 2);
        let deployed = store.list(Some(DeploymentStatus::Deployed)).await.unwrap();
        assert_eq!(deployed.len(), 1);
        assert_eq!(deployed[0].unit_id, "b");
    }

    #[tokio::test]
    async fn test_secret_upsert_keeps_created_at_and_reactivates() {
        let store = MemorySecretStore::new();
        let rec = record("user-1", "weather-api", "API_KEY", "k1");
        store.upsert(rec.clone()).await.unwrap();
        assert!(store.disable(&rec.key(), t0()).await.unwrap());
        assert!(!store.disable(&rec.key(), t0()).await.unwrap());
        assert!(store.get_active(&rec.key()).await.unwrap().is_none());

        let mut again = record("user-1", "weather-api", "API_KEY", "k1");
        again.created_at = t0() + chrono::Duration::days(1);
        store.upsert(again).await.unwrap();
        let active = store.get_active(&rec.key()).await.unwrap().unwrap();
        assert_eq!(active.created_at, t0());
    }

    #[tokio::test]
    async fn test_secret_listing_scopes() {
        let store = MemorySecretStore::new();
        store.upsert(record("user-1", "weather-api", "API_KEY", "k1")).await.unwrap();
        store.upsert(record("user-1", "maps", "TOKEN", "k0")).await.unwrap();
        store.upsert(record("user-2", "maps", "TOKEN", "k1")).await.unwrap();

        assert_eq!(store.list_active("user-1", None).await.unwrap().len(), 2);
        assert_eq!(store.list_active("user-1", Some("maps")).await.unwrap().len(), 1);
        assert_eq!(store.list_not_under_key("k1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_grants() {
        let store = MemoryGrantStore::new();
        assert!(store.grant("u1", "s3://b/k", t0()).await.unwrap());
        assert!(!store.grant("u1", "s3://b/k", t0()).await.unwrap());
        assert!(store.contains("u1", "s3://b/k").await.unwrap());
        assert!(!store.contains("u2", "s3://b/k").await.unwrap());
        assert_eq!(store.list("u1").await.unwrap().len(), 1);
        assert!(store.revoke("u1", "s3://b/k").await.unwrap());
        assert!(!store.revoke("u1", "s3://b/k").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoking_last_grant_drops_user_entry() {
        let store = MemoryGrantStore::new();
        store.grant("u1", "s3://b/a", t0()).await.unwrap();
        store.grant("u1", "s3://b/b", t0()).await.unwrap();

        store.revoke("u1", "s3://b/a").await.unwrap();
        assert_eq!(store.grants.read().await.len(), 1);
        store.revoke("u1", "s3://b/b").await.unwrap();
        assert!(store.grants.read().await.is_empty());
        assert!(store.list("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_document_keeps_lifecycle_and_counters() {
        let store = MemorySpecStore::new();
        let key = SpecKey::new("weather-api", "1.0.0");
        let doc = SpecDocument {
            name: "Weather".to_string(),
            description: "v1".to_string(),
            functions: vec![],
        };
        store
            .publish_document(&key, &doc, Some("s3://artifacts/w.tar"), None, t0())
            .await
            .unwrap();
        store
            .apply_transition(&key, DeploymentStatus::Deployed, Some("http://w"), t0())
            .await
            .unwrap();
        store.record_call(&key, t0()).await.unwrap();

        let later = t0() + chrono::Duration::minutes(5);
        let republished = store
            .publish_document(
                &key,
                &SpecDocument {
                    description: "v2".to_string(),
                    ..doc
                },
                None,
                Some("github.com/acme/weather"),
                later,
            )
            .await
            .unwrap();
        assert_eq!(republished.description, "v2");
        assert_eq!(republished.deployment_status, DeploymentStatus::Deployed);
        assert_eq!(republished.endpoint_url.as_deref(), Some("http://w"));
        assert_eq!(republished.deployed_at, Some(t0()));
        assert_eq!(republished.call_count, 1);
        assert_eq!(republished.artifact_url.as_deref(), Some("s3://artifacts/w.tar"));
        assert_eq!(republished.source_repo.as_deref(), Some("github.com/acme/weather"));
        assert_eq!(republished.created_at, t0());
        assert_eq!(republished.updated_at, later);
    }

    #[tokio::test]
    async fn test_replace_ciphertext_requires_previous_envelope() {
        let store = MemorySecretStore::new();
        let rec = record("user-1", "weather-api", "API_KEY", "k0");
        store.upsert(rec.clone()).await.unwrap();

        assert!(!store
            .replace_ciphertext(&rec.key(), "enc:v1:other", "enc:v1:new", "k1", t0())
            .await
            .unwrap());
        assert_eq!(store.raw(&rec.key()).await.unwrap().encryption_key_id, "k0");

        assert!(store
            .replace_ciphertext(&rec.key(), &rec.encrypted_value, "enc:v1:new", "k1", t0())
            .await
            .unwrap());
        let raw = store.raw(&rec.key()).await.unwrap();
        assert_eq!(raw.encrypted_value, "enc:v1:new");
        assert_eq!(raw.encryption_key_id, "k1");

        let missing = SecretKey::new("user-9", "weather-api", "API_KEY");
        assert!(!store
            .replace_ciphertext(&missing, "x", "y", "k1", t0())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_event_ledger_lifecycle() {
        let store = MemoryEventStore::new();
        let payload = json!({
            "event_id": "evt-1",
            "event_type": "deployment.success",
            "unit_id": "weather-api",
            "version": "1.0.0"
        });
        let parsed: WebhookPayload = serde_json::from_value(payload.clone()).unwrap();
        let event = WebhookEvent::received(&parsed.validate().unwrap(), payload, None, t0());

        store.insert_if_absent(&event).await.unwrap();
        store.record_failure("evt-1", "db down").await.unwrap();

        let mut dup = event.clone();
        dup.event_type = "ignored".to_string();
        let stored = store.insert_if_absent(&dup).await.unwrap();
        assert_eq!(stored.event_type, "deployment.success");
        assert_eq!(stored.retry_count, 1);

        assert!(store
            .mark_processed("evt-1", t0(), &json!({"status": "processed"}))
            .await
            .unwrap());
        let done = store.get("evt-1").await.unwrap().unwrap();
        assert!(done.processed);
        assert!(done.processing_error.is_none());
        assert_eq!(store.len().await, 1);

        assert!(!store
            .mark_processed("evt-1", t0(), &json!({"status": "late"}))
            .await
            .unwrap());
        let kept = store.get("evt-1").await.unwrap().unwrap();
        assert_eq!(kept.outcome, Some(json!({"status": "processed"})));
        assert!(store
            .mark_processed("evt-missing", t0(), &json!({}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_audit_query_newest_first() {
        let log = MemoryAuditLog::new();
        for (i, user) in ["u1", "u2", "u1"].iter().enumerate() {
            log.append(&AuditEntry {
                id: uuid::Uuid::new_v4(),
                request_id: format!("req-{i}"),
                user_id: Some(user.to_string()),
                action: "run".to_string(),
                resource_type: "job".to_string(),
                resource_id: None,
                endpoint: "/v1/run".to_string(),
                method: "POST".to_string(),
                success: true,
                error_code: None,
                duration_ms: 3,
                created_at: t0(),
            })
            .await
            .unwrap();
        }
        let q = AuditQuery {
            user_id: Some("u1".to_string()),
            ..Default::default()
        };
        let got = log.query(&q).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].request_id, "req-2");
    }
}
