//! Two-tier spec cache.
//!
//! Tier-1 is a [`FastCache`] holding JSON-encoded [`UnitSpec`] rows under a
//! TTL. Tier-2 is the authoritative [`SpecStore`]. A Tier-1 miss or error is
//! never taken to mean the spec does not exist.

use chrono::Utc;
use prefab_core::{
    DeploymentStatus, PrefabResult, SpecDocument, SpecKey, Timestamp, TransitionOutcome, UnitSpec,
};
use prefab_storage::{CacheStats, FastCache, SpecStore};
use std::sync::Arc;
use std::time::Duration;

use crate::telemetry::metrics;

/// Optional provenance recorded at publish time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishMeta {
    pub artifact_url: Option<String>,
    pub source_repo: Option<String>,
}

pub struct SpecCache {
    fast: Arc<dyn FastCache>,
    durable: Arc<dyn SpecStore>,
    ttl: Duration,
}

impl SpecCache {
    pub fn new(fast: Arc<dyn FastCache>, durable: Arc<dyn SpecStore>, ttl: Duration) -> Self {
        Self { fast, durable, ttl }
    }

    pub fn fast_backend(&self) -> &'static str {
        self.fast.backend_name()
    }

    pub async fn fast_stats(&self) -> PrefabResult<CacheStats> {
        Ok(self.fast.stats().await?)
    }

    async fn read_fast(&self, key: &SpecKey) -> Option<UnitSpec> {
        let cache_key = key.cache_key();
        match self.fast.get(&cache_key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(spec) => Some(spec),
                Err(e) => {
                    tracing::warn!(spec = %key, error = %e, "Discarding undecodable cached spec");
                    let _ = self.fast.delete(&cache_key).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(spec = %key, error = %e, "Fast tier read failed, using durable tier");
                None
            }
        }
    }

    async fn write_fast(&self, spec: &UnitSpec) {
        let key = spec.key();
        let bytes = match serde_json::to_vec(spec) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(spec = %key, error = %e, "Failed to encode spec for fast tier");
                return;
            }
        };
        if let Err(e) = self.fast.set(&key.cache_key(), &bytes, self.ttl).await {
            tracing::warn!(spec = %key, error = %e, "Fast tier write failed");
        }
    }

    /// Drop the Tier-1 entry for `key`. Failures are logged; the TTL bounds
    /// any staleness they leave behind.
    pub async fn invalidate(&self, key: &SpecKey) {
        if let Err(e) = self.fast.delete(&key.cache_key()).await {
            tracing::warn!(spec = %key, error = %e, "Fast tier invalidation failed");
        }
    }

    /// Resolve a spec for a call.
    ///
    /// A Tier-2 hit counts as a use of the unit and is written through to
    /// Tier-1. Absent from both tiers is `Ok(None)`.
    pub async fn get(&self, key: &SpecKey) -> PrefabResult<Option<UnitSpec>> {
        if let Some(spec) = self.read_fast(key).await {
            if let Some(m) = metrics() {
                m.record_spec_lookup("fast");
            }
            return Ok(Some(spec));
        }

        let Some(spec) = self.durable.record_call(key, Utc::now()).await? else {
            if let Some(m) = metrics() {
                m.record_spec_lookup("none");
            }
            return Ok(None);
        };
        if let Some(m) = metrics() {
            m.record_spec_lookup("durable");
        }
        self.write_fast(&spec).await;
        Ok(Some(spec))
    }

    /// Create or replace the interface of `key`.
    ///
    /// An existing row keeps its deployment status and usage counters. The
    /// durable write happens first; Tier-1 is only populated once it
    /// succeeded. A transition committing between the two writes has
    /// already run its invalidation, so the row is re-read after the
    /// write-through and Tier-1 dropped when the lifecycle moved on.
    pub async fn publish(
        &self,
        key: &SpecKey,
        document: SpecDocument,
        meta: PublishMeta,
    ) -> PrefabResult<UnitSpec> {
        let spec = self
            .durable
            .publish_document(
                key,
                &document,
                meta.artifact_url.as_deref(),
                meta.source_repo.as_deref(),
                Utc::now(),
            )
            .await?;
        self.write_fast(&spec).await;
        match self.durable.get(key).await {
            Ok(Some(current)) if same_lifecycle(&current, &spec) => {}
            Ok(_) => self.invalidate(key).await,
            Err(e) => {
                tracing::warn!(spec = %key, error = %e, "Post-publish check failed");
                self.invalidate(key).await;
            }
        }
        tracing::info!(
            spec = %key,
            functions = spec.functions.len(),
            status = %spec.deployment_status,
            "Published spec"
        );
        Ok(spec)
    }

    /// Apply a deployment transition durably, then invalidate Tier-1.
    pub async fn apply_transition(
        &self,
        key: &SpecKey,
        target: DeploymentStatus,
        endpoint_url: Option<&str>,
        at: Timestamp,
    ) -> PrefabResult<(TransitionOutcome, UnitSpec)> {
        let result = self
            .durable
            .apply_transition(key, target, endpoint_url, at)
            .await?;
        self.invalidate(key).await;
        Ok(result)
    }

    /// Remove the durable row, then the Tier-1 entry. Returns whether a row
    /// existed.
    pub async fn delete(&self, key: &SpecKey) -> PrefabResult<bool> {
        let existed = self.durable.delete(key).await?;
        self.invalidate(key).await;
        if existed {
            tracing::info!(spec = %key, "Deleted spec");
        }
        Ok(existed)
    }

    /// Administrative listing, straight from Tier-2.
    pub async fn list(&self, status: Option<DeploymentStatus>) -> PrefabResult<Vec<UnitSpec>> {
        Ok(self.durable.list(status).await?)
    }
}

fn same_lifecycle(a: &UnitSpec, b: &UnitSpec) -> bool {
    a.deployment_status == b.deployment_status
        && a.endpoint_url == b.endpoint_url
        && a.deployed_at == b.deployed_at
}

#[cfg(test)]
mod tests {
    use super::*;
    use prefab_storage::{LocalFastCache, MemorySpecStore};
    use prefab_test_utils::{weather_document, FailingFastCache};

    struct Fixture {
        fast: Arc<LocalFastCache>,
        durable: Arc<MemorySpecStore>,
        cache: SpecCache,
    }

    fn fixture() -> Fixture {
        let fast = Arc::new(LocalFastCache::new());
        let durable = Arc::new(MemorySpecStore::new());
        let cache = SpecCache::new(fast.clone(), durable.clone(), Duration::from_secs(3600));
        Fixture {
            fast,
            durable,
            cache,
        }
    }

    fn key() -> SpecKey {
        SpecKey::new("weather-api", "1.0.0")
    }

    #[tokio::test]
    async fn test_publish_then_get() {
        let f = fixture();
        f.cache
            .publish(&key(), weather_document(), PublishMeta::default())
            .await
            .unwrap();

        assert!(f.fast.get(&key().cache_key()).await.unwrap().is_some());
        let spec = f.cache.get(&key()).await.unwrap().unwrap();
        assert_eq!(spec.name, "weather-api");
        assert!(spec.find_function("get_forecast").is_some());
    }

    #[tokio::test]
    async fn test_fast_miss_reads_through_and_counts_use() {
        let f = fixture();
        f.cache
            .publish(&key(), weather_document(), PublishMeta::default())
            .await
            .unwrap();
        f.fast.delete(&key().cache_key()).await.unwrap();

        let spec = f.cache.get(&key()).await.unwrap().unwrap();
        assert_eq!(spec.call_count, 1);
        assert!(spec.last_called_at.is_some());
        assert!(f.fast.get(&key().cache_key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_total_miss_is_none() {
        let f = fixture();
        assert!(f.cache.get(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fast_tier_failure_falls_through() {
        let durable = Arc::new(MemorySpecStore::new());
        let cache = SpecCache::new(
            Arc::new(FailingFastCache),
            durable.clone(),
            Duration::from_secs(60),
        );
        cache
            .publish(&key(), weather_document(), PublishMeta::default())
            .await
            .unwrap();
        assert!(cache.get(&key()).await.unwrap().is_some());
        assert!(cache.delete(&key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_republish_keeps_status_and_counters() {
        let f = fixture();
        f.cache
            .publish(&key(), weather_document(), PublishMeta::default())
            .await
            .unwrap();
        f.cache
            .apply_transition(
                &key(),
                DeploymentStatus::Deployed,
                Some("http://weather"),
                Utc::now(),
            )
            .await
            .unwrap();
        f.durable.record_call(&key(), Utc::now()).await.unwrap();

        let mut document = weather_document();
        document.description = "Updated".to_string();
        let meta = PublishMeta {
            artifact_url: Some("s3://artifacts/weather.tar".to_string()),
            source_repo: None,
        };
        let spec = f.cache.publish(&key(), document, meta).await.unwrap();
        assert_eq!(spec.deployment_status, DeploymentStatus::Deployed);
        assert_eq!(spec.call_count, 1);
        assert_eq!(spec.description, "Updated");
        assert_eq!(spec.artifact_url.as_deref(), Some("s3://artifacts/weather.tar"));
    }

    /// Store that lets another writer commit just before its own write.
    struct Interleaved {
        inner: MemorySpecStore,
        before_publish: std::sync::Mutex<Option<DeploymentStatus>>,
        after_publish: std::sync::Mutex<Option<DeploymentStatus>>,
        before_transition: std::sync::Mutex<Option<SpecDocument>>,
    }

    impl Interleaved {
        fn new() -> Self {
            Self {
                inner: MemorySpecStore::new(),
                before_publish: std::sync::Mutex::new(None),
                after_publish: std::sync::Mutex::new(None),
                before_transition: std::sync::Mutex::new(None),
            }
        }
    }

    #[async_trait::async_trait]
    impl SpecStore for Interleaved {
        async fn get(&self, key: &SpecKey) -> prefab_storage::StorageResult<Option<UnitSpec>> {
            self.inner.get(key).await
        }

        async fn publish_document(
            &self,
            key: &SpecKey,
            document: &SpecDocument,
            artifact_url: Option<&str>,
            source_repo: Option<&str>,
            at: Timestamp,
        ) -> prefab_storage::StorageResult<UnitSpec> {
            let pending = self.before_publish.lock().unwrap().take();
            if let Some(target) = pending {
                self.inner
                    .apply_transition(key, target, Some("http://weather"), at)
                    .await?;
            }
            let published = self
                .inner
                .publish_document(key, document, artifact_url, source_repo, at)
                .await?;
            let pending = self.after_publish.lock().unwrap().take();
            if let Some(target) = pending {
                self.inner
                    .apply_transition(key, target, Some("http://weather"), at)
                    .await?;
            }
            Ok(published)
        }

        async fn record_call(
            &self,
            key: &SpecKey,
            at: Timestamp,
        ) -> prefab_storage::StorageResult<Option<UnitSpec>> {
            self.inner.record_call(key, at).await
        }

        async fn apply_transition(
            &self,
            key: &SpecKey,
            target: DeploymentStatus,
            endpoint_url: Option<&str>,
            at: Timestamp,
        ) -> prefab_storage::StorageResult<(TransitionOutcome, UnitSpec)> {
            let pending = self.before_transition.lock().unwrap().take();
            if let Some(document) = pending {
                self.inner
                    .publish_document(key, &document, None, None, at)
                    .await?;
            }
            self.inner
                .apply_transition(key, target, endpoint_url, at)
                .await
        }

        async fn delete(&self, key: &SpecKey) -> prefab_storage::StorageResult<bool> {
            self.inner.delete(key).await
        }

        async fn list(
            &self,
            status: Option<DeploymentStatus>,
        ) -> prefab_storage::StorageResult<Vec<UnitSpec>> {
            self.inner.list(status).await
        }
    }

    #[tokio::test]
    async fn test_publish_does_not_undo_concurrent_deployment() {
        let durable = Arc::new(Interleaved::new());
        let cache = SpecCache::new(
            Arc::new(LocalFastCache::new()),
            durable.clone(),
            Duration::from_secs(3600),
        );
        cache
            .publish(&key(), weather_document(), PublishMeta::default())
            .await
            .unwrap();
        cache
            .apply_transition(&key(), DeploymentStatus::Deploying, None, Utc::now())
            .await
            .unwrap();
        durable.inner.record_call(&key(), Utc::now()).await.unwrap();

        *durable.before_publish.lock().unwrap() = Some(DeploymentStatus::Deployed);
        let mut document = weather_document();
        document.description = "Republished".to_string();
        let spec = cache
            .publish(&key(), document, PublishMeta::default())
            .await
            .unwrap();

        assert_eq!(spec.description, "Republished");
        assert_eq!(spec.deployment_status, DeploymentStatus::Deployed);
        assert_eq!(spec.endpoint_url.as_deref(), Some("http://weather"));
        assert!(spec.deployed_at.is_some());
        assert_eq!(spec.call_count, 1);

        let stored = durable.inner.get(&key()).await.unwrap().unwrap();
        assert_eq!(stored, spec);
    }

    #[tokio::test]
    async fn test_transition_after_durable_publish_is_not_masked_by_write_through() {
        let durable = Arc::new(Interleaved::new());
        let fast = Arc::new(LocalFastCache::new());
        let cache = SpecCache::new(fast.clone(), durable.clone(), Duration::from_secs(3600));

        *durable.after_publish.lock().unwrap() = Some(DeploymentStatus::Deployed);
        let spec = cache
            .publish(&key(), weather_document(), PublishMeta::default())
            .await
            .unwrap();
        assert_eq!(spec.deployment_status, DeploymentStatus::Pending);
        assert!(fast.get(&key().cache_key()).await.unwrap().is_none());

        let fetched = cache.get(&key()).await.unwrap().unwrap();
        assert_eq!(fetched.deployment_status, DeploymentStatus::Deployed);
        assert_eq!(fetched.endpoint_url.as_deref(), Some("http://weather"));
    }

    #[tokio::test]
    async fn test_first_event_does_not_clobber_concurrent_publish() {
        let durable = Arc::new(Interleaved::new());
        let cache = SpecCache::new(
            Arc::new(LocalFastCache::new()),
            durable.clone(),
            Duration::from_secs(3600),
        );
        *durable.before_transition.lock().unwrap() = Some(weather_document());

        let (outcome, spec) = cache
            .apply_transition(&key(), DeploymentStatus::Building, None, Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Applied { .. }));
        assert_eq!(spec.deployment_status, DeploymentStatus::Building);
        assert!(spec.find_function("get_forecast").is_some());

        let fetched = cache.get(&key()).await.unwrap().unwrap();
        assert_eq!(fetched.description, "Forecasts by city");
    }

    #[tokio::test]
    async fn test_status_change_invalidates_fast_tier() {
        let f = fixture();
        f.cache
            .publish(&key(), weather_document(), PublishMeta::default())
            .await
            .unwrap();
        assert!(f.fast.get(&key().cache_key()).await.unwrap().is_some());

        let (outcome, spec) = f
            .cache
            .apply_transition(&key(), DeploymentStatus::Deploying, None, Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Applied { .. }));
        assert_eq!(spec.deployment_status, DeploymentStatus::Deploying);
        assert!(f.fast.get(&key().cache_key()).await.unwrap().is_none());

        let fresh = f.cache.get(&key()).await.unwrap().unwrap();
        assert_eq!(fresh.deployment_status, DeploymentStatus::Deploying);
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let f = fixture();
        f.cache
            .publish(&key(), weather_document(), PublishMeta::default())
            .await
            .unwrap();
        f.cache
            .publish(
                &SpecKey::new("weather-api", "2.0.0"),
                weather_document(),
                PublishMeta::default(),
            )
            .await
            .unwrap();
        assert_eq!(f.cache.list(None).await.unwrap().len(), 2);
        assert_eq!(
            f.cache
                .list(Some(DeploymentStatus::Deployed))
                .await
                .unwrap()
                .len(),
            0
        );

        assert!(f.cache.delete(&key()).await.unwrap());
        assert!(!f.cache.delete(&key()).await.unwrap());
        assert!(f.cache.get(&key()).await.unwrap().is_none());
        assert_eq!(f.durable.len().await, 1);
    }
}
