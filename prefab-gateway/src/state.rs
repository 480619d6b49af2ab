//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use prefab_storage::{
    AuditLog, EventStore, FastCache, FastTier, GrantStore, MemoryAuditLog, MemoryEventStore,
    MemoryGrantStore, MemorySecretStore, MemorySpecStore, SecretStore, SpecStore,
};

use crate::acl::Acl;
use crate::auth::AuthConfig;
use crate::config::{GatewayConfig, StorageMode};
use crate::crypto::KeyRing;
use crate::db::{
    DbClient, DbConfig, PgAuditLog, PgEventStore, PgGrantStore, PgSecretStore, PgSpecStore,
};
use crate::error::{ApiError, ApiResult};
use crate::jobs::WorkspaceReclaimMetrics;
use crate::orchestrator::{HttpUnitInvoker, Orchestrator, UnitInvoker};
use crate::spec_cache::SpecCache;
use crate::vault::Vault;
use crate::webhook::WebhookProcessor;
use crate::workspace::{HttpObjectStore, LocalObjectStore, ObjectStore, S3Config, WorkspaceManager};

/// Durable store handles, Postgres-backed or in-memory.
#[derive(Clone)]
pub struct Stores {
    pub specs: Arc<dyn SpecStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub grants: Arc<dyn GrantStore>,
    pub events: Arc<dyn EventStore>,
    pub audit: Arc<dyn AuditLog>,
    /// Present in Postgres mode; readiness checks ping it.
    pub db: Option<DbClient>,
}

impl Stores {
    pub fn memory() -> Self {
        Self {
            specs: Arc::new(MemorySpecStore::new()),
            secrets: Arc::new(MemorySecretStore::new()),
            grants: Arc::new(MemoryGrantStore::new()),
            events: Arc::new(MemoryEventStore::new()),
            audit: Arc::new(MemoryAuditLog::new()),
            db: None,
        }
    }

    pub fn postgres(db: DbClient) -> Self {
        Self {
            specs: Arc::new(PgSpecStore::new(db.clone())),
            secrets: Arc::new(PgSecretStore::new(db.clone())),
            grants: Arc::new(PgGrantStore::new(db.clone())),
            events: Arc::new(PgEventStore::new(db.clone())),
            audit: Arc::new(PgAuditLog::new(db.clone())),
            db: Some(db),
        }
    }
}

/// External collaborators that tests replace with doubles.
pub struct Collaborators {
    pub fast_cache: Arc<dyn FastCache>,
    pub object_store: Arc<dyn ObjectStore>,
    pub invoker: Arc<dyn UnitInvoker>,
}

impl Collaborators {
    /// Production wiring from configuration and the environment.
    ///
    /// The object store is S3-compatible when `PREFAB_S3_*` is complete and
    /// a local directory (`PREFAB_OBJECT_STORE_DIR`, default
    /// `./prefab-objects`) otherwise.
    pub fn from_config(config: &GatewayConfig) -> ApiResult<Self> {
        let fast_cache: Arc<dyn FastCache> = Arc::new(FastTier::open(
            config.lmdb_path.as_deref(),
            config.lmdb_max_size_mb,
        ));

        let object_store: Arc<dyn ObjectStore> = match S3Config::from_env() {
            Some(s3) => {
                tracing::info!(endpoint = %s3.endpoint, bucket = %s3.bucket, "Using S3-compatible object store");
                let client = reqwest::Client::builder()
                    .timeout(config.invoke.timeout)
                    .build()
                    .map_err(|e| {
                        ApiError::internal_error(format!("failed to build HTTP client: {}", e))
                    })?;
                Arc::new(HttpObjectStore::new(client, s3))
            }
            None => {
                let dir = std::env::var("PREFAB_OBJECT_STORE_DIR")
                    .unwrap_or_else(|_| "./prefab-objects".to_string());
                tracing::info!(dir = %dir, "Using local directory object store");
                Arc::new(LocalObjectStore::new(dir, "prefab-outputs"))
            }
        };

        let invoker: Arc<dyn UnitInvoker> = Arc::new(HttpUnitInvoker::new(config.invoke.clone())?);

        Ok(Self {
            fast_cache,
            object_store,
            invoker,
        })
    }
}

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub auth: Arc<AuthConfig>,
    pub specs: Arc<SpecCache>,
    pub vault: Arc<Vault>,
    pub acl: Acl,
    pub webhooks: Arc<WebhookProcessor>,
    pub orchestrator: Orchestrator,
    pub workspaces: Arc<WorkspaceManager>,
    pub audit: Arc<dyn AuditLog>,
    pub db: Option<DbClient>,
    pub reclaim_metrics: Arc<WorkspaceReclaimMetrics>,
    pub start_time: Instant,
}

impl AppState {
    /// Assemble the components over the given stores and collaborators.
    pub fn new(
        config: GatewayConfig,
        auth: AuthConfig,
        stores: Stores,
        collaborators: Collaborators,
    ) -> Self {
        let specs = Arc::new(SpecCache::new(
            collaborators.fast_cache,
            stores.specs,
            config.spec_cache_ttl,
        ));
        let keys = KeyRing::new(&config.encryption_key, config.encryption_key_previous.as_ref());
        let vault = Arc::new(Vault::new(stores.secrets, keys));
        let acl = Acl::new(stores.grants);
        let webhooks = Arc::new(WebhookProcessor::new(
            stores.events,
            specs.clone(),
            config.webhook_secret.clone(),
        ));
        let workspaces = Arc::new(WorkspaceManager::new(
            config.workspace.root.clone(),
            collaborators.object_store,
        ));
        let orchestrator = Orchestrator::new(
            specs.clone(),
            acl.clone(),
            vault.clone(),
            workspaces.clone(),
            collaborators.invoker,
        );

        Self {
            config: Arc::new(config),
            auth: Arc::new(auth),
            specs,
            vault,
            acl,
            webhooks,
            orchestrator,
            workspaces,
            audit: stores.audit,
            db: stores.db,
            reclaim_metrics: Arc::new(WorkspaceReclaimMetrics::new()),
            start_time: Instant::now(),
        }
    }

    /// Production assembly: stores per `config.storage`, collaborators from
    /// the environment.
    pub fn from_config(config: GatewayConfig, auth: AuthConfig) -> ApiResult<Self> {
        let stores = match config.storage {
            StorageMode::Postgres => {
                let db = DbClient::from_config(&DbConfig::from_env())?;
                tracing::info!("Using Postgres storage");
                Stores::postgres(db)
            }
            StorageMode::Memory => {
                tracing::warn!("Using in-memory storage; nothing survives a restart");
                Stores::memory()
            }
        };
        let collaborators = Collaborators::from_config(&config)?;
        Ok(Self::new(config, auth, stores, collaborators))
    }
}

// Use macro to reduce boilerplate for FromRef implementations
crate::impl_from_ref!(Arc<AuthConfig>, auth);
crate::impl_from_ref!(Arc<SpecCache>, specs);
crate::impl_from_ref!(Arc<Vault>, vault);
crate::impl_from_ref!(Acl, acl);
crate::impl_from_ref!(Arc<WebhookProcessor>, webhooks);
crate::impl_from_ref!(Orchestrator, orchestrator);
crate::impl_from_ref!(Arc<dyn AuditLog>, audit);
crate::impl_from_ref!(Instant, start_time);
