//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling using deadpool-postgres, plus the Postgres
//! implementations of the durable store traits. The schema is managed
//! outside this crate; `sql/schema.sql` documents the expected tables.

use crate::constants::MAX_AUDIT_LIMIT;
use crate::env_or;
use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use prefab_core::{
    AccessGrant, AuditEntry, AuditQuery, DeploymentStatus, FunctionDescriptor, SecretKey,
    SecretRecord, SecretStatus, SpecDocument, SpecKey, Timestamp, TransitionOutcome, UnitSpec,
    WebhookEvent,
};
use prefab_storage::{
    AuditLog, EventStore, GrantStore, SecretStore, SpecStore, StorageError, StorageResult,
    DEFAULT_AUDIT_LIMIT,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio_postgres::{NoTls, Row};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: SecretString,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait/create/recycle timeout for pooled connections
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "prefab".to_string(),
            user: "postgres".to_string(),
            password: SecretString::from(""),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("PREFAB_DB_HOST").unwrap_or(defaults.host),
            port: env_or!("PREFAB_DB_PORT", defaults.port),
            dbname: std::env::var("PREFAB_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("PREFAB_DB_USER").unwrap_or(defaults.user),
            password: SecretString::from(std::env::var("PREFAB_DB_PASSWORD").unwrap_or_default()),
            max_size: env_or!("PREFAB_DB_POOL_SIZE", defaults.max_size),
            timeout: Duration::from_secs(env_or!("PREFAB_DB_TIMEOUT_SECS", 30u64)),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.expose_secret().to_string());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        pool_cfg.timeouts.create = Some(self.timeout);
        pool_cfg.timeouts.recycle = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// DATABASE CLIENT WRAPPER
// ============================================================================

/// Shared pool handle. Cheap to clone; every store below wraps one.
#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
}

impl DbClient {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> StorageResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            tracing::error!("Connection pool error: {:?}", e);
            StorageError::Unavailable(format!("database connection unavailable: {}", e))
        })
    }

    /// Round-trip a trivial query. Used by readiness checks.
    pub async fn ping(&self) -> ApiResult<()> {
        let conn = self.pool.get().await?;
        conn.query_one("SELECT 1", &[]).await?;
        Ok(())
    }
}

fn read_failed(entity: &'static str) -> impl Fn(tokio_postgres::Error) -> StorageError {
    move |e| {
        tracing::error!(entity, "Database read failed: {:?}", e);
        StorageError::ReadFailed {
            entity,
            reason: e.to_string(),
        }
    }
}

fn write_failed(entity: &'static str) -> impl Fn(tokio_postgres::Error) -> StorageError {
    move |e| {
        tracing::error!(entity, "Database write failed: {:?}", e);
        StorageError::WriteFailed {
            entity,
            reason: e.to_string(),
        }
    }
}

fn column<'a, T>(row: &'a Row, name: &str) -> StorageResult<T>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get(name)
        .map_err(|e| StorageError::Serialization(format!("column {}: {}", name, e)))
}

// ============================================================================
// SPECS
// ============================================================================

const SPEC_COLUMNS: &str = "unit_id, version, name, description, functions, deployment_status, \
     endpoint_url, artifact_url, source_repo, call_count, last_called_at, created_at, \
     updated_at, deployed_at";

fn spec_from_row(row: &Row) -> StorageResult<UnitSpec> {
    let functions: JsonValue = column(row, "functions")?;
    let functions: Vec<FunctionDescriptor> = serde_json::from_value(functions)
        .map_err(|e| StorageError::Serialization(format!("functions: {}", e)))?;
    let status: String = column(row, "deployment_status")?;
    let deployment_status = DeploymentStatus::from_db_str(&status)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    Ok(UnitSpec {
        unit_id: column(row, "unit_id")?,
        version: column(row, "version")?,
        name: column(row, "name")?,
        description: column::<Option<String>>(row, "description")?.unwrap_or_default(),
        functions,
        deployment_status,
        endpoint_url: column(row, "endpoint_url")?,
        artifact_url: column(row, "artifact_url")?,
        source_repo: column(row, "source_repo")?,
        call_count: column(row, "call_count")?,
        last_called_at: column(row, "last_called_at")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
        deployed_at: column(row, "deployed_at")?,
    })
}

fn functions_json(functions: &[FunctionDescriptor]) -> StorageResult<JsonValue> {
    serde_json::to_value(functions).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// New rows start PENDING with zero usage. On conflict only the interface
/// columns move; lifecycle and counters belong to transitions and calls.
const PUBLISH_SPEC: &str = "INSERT INTO prefab_specs (unit_id, version, name, description, \
     functions, deployment_status, artifact_url, source_repo, call_count, created_at, updated_at) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9, $9) \
     ON CONFLICT (unit_id, version) DO UPDATE SET \
     name = EXCLUDED.name, description = EXCLUDED.description, functions = EXCLUDED.functions, \
     artifact_url = COALESCE(EXCLUDED.artifact_url, prefab_specs.artifact_url), \
     source_repo = COALESCE(EXCLUDED.source_repo, prefab_specs.source_repo), \
     updated_at = EXCLUDED.updated_at";

const INSERT_PLACEHOLDER: &str = "INSERT INTO prefab_specs (unit_id, version, name, description, \
     functions, deployment_status, call_count, created_at, updated_at) \
     VALUES ($1, $2, $3, '', '[]'::jsonb, $4, 0, $5, $5) \
     ON CONFLICT (unit_id, version) DO NOTHING";

const UPDATE_LIFECYCLE: &str = "UPDATE prefab_specs SET deployment_status = $3, \
     endpoint_url = $4, updated_at = $5, deployed_at = $6 \
     WHERE unit_id = $1 AND version = $2";

/// `prefab_specs` table.
#[derive(Clone)]
pub struct PgSpecStore {
    db: DbClient,
}

impl PgSpecStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SpecStore for PgSpecStore {
    async fn get(&self, key: &SpecKey) -> StorageResult<Option<UnitSpec>> {
        let conn = self.db.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM prefab_specs WHERE unit_id = $1 AND version = $2",
            SPEC_COLUMNS
        );
        let row = conn
            .query_opt(&sql, &[&key.unit_id, &key.version])
            .await
            .map_err(read_failed("spec"))?;
        row.as_ref().map(spec_from_row).transpose()
    }

    async fn publish_document(
        &self,
        key: &SpecKey,
        document: &SpecDocument,
        artifact_url: Option<&str>,
        source_repo: Option<&str>,
        at: Timestamp,
    ) -> StorageResult<UnitSpec> {
        let conn = self.db.get_conn().await?;
        let functions = functions_json(&document.functions)?;
        let sql = format!("{} RETURNING {}", PUBLISH_SPEC, SPEC_COLUMNS);
        let row = conn
            .query_one(
                &sql,
                &[
                    &key.unit_id,
                    &key.version,
                    &document.name,
                    &document.description,
                    &functions,
                    &DeploymentStatus::Pending.as_db_str(),
                    &artifact_url,
                    &source_repo,
                    &at,
                ],
            )
            .await
            .map_err(write_failed("spec"))?;
        spec_from_row(&row)
    }

    async fn record_call(&self, key: &SpecKey, at: Timestamp) -> StorageResult<Option<UnitSpec>> {
        let conn = self.db.get_conn().await?;
        let sql = format!(
            "UPDATE prefab_specs SET call_count = call_count + 1, last_called_at = $3 \
             WHERE unit_id = $1 AND version = $2 RETURNING {}",
            SPEC_COLUMNS
        );
        let row = conn
            .query_opt(&sql, &[&key.unit_id, &key.version, &at])
            .await
            .map_err(write_failed("spec"))?;
        row.as_ref().map(spec_from_row).transpose()
    }

    async fn apply_transition(
        &self,
        key: &SpecKey,
        target: DeploymentStatus,
        endpoint_url: Option<&str>,
        at: Timestamp,
    ) -> StorageResult<(TransitionOutcome, UnitSpec)> {
        let mut conn = self.db.get_conn().await?;
        let tx = conn.transaction().await.map_err(write_failed("spec"))?;

        // A publish committing concurrently wins the insert; the lock below
        // then sees its row.
        tx.execute(
            INSERT_PLACEHOLDER,
            &[
                &key.unit_id,
                &key.version,
                &key.unit_id,
                &DeploymentStatus::Pending.as_db_str(),
                &at,
            ],
        )
        .await
        .map_err(write_failed("spec"))?;

        let sql = format!(
            "SELECT {} FROM prefab_specs WHERE unit_id = $1 AND version = $2 FOR UPDATE",
            SPEC_COLUMNS
        );
        let row = tx
            .query_one(&sql, &[&key.unit_id, &key.version])
            .await
            .map_err(read_failed("spec"))?;
        let mut spec = spec_from_row(&row)?;

        let outcome = spec.apply_transition(target, endpoint_url, at);
        if matches!(outcome, TransitionOutcome::Applied { .. }) {
            tx.execute(
                UPDATE_LIFECYCLE,
                &[
                    &spec.unit_id,
                    &spec.version,
                    &spec.deployment_status.as_db_str(),
                    &spec.endpoint_url,
                    &spec.updated_at,
                    &spec.deployed_at,
                ],
            )
            .await
            .map_err(write_failed("spec"))?;
        }
        tx.commit().await.map_err(write_failed("spec"))?;
        Ok((outcome, spec))
    }

    async fn delete(&self, key: &SpecKey) -> StorageResult<bool> {
        let conn = self.db.get_conn().await?;
        let removed = conn
            .execute(
                "DELETE FROM prefab_specs WHERE unit_id = $1 AND version = $2",
                &[&key.unit_id, &key.version],
            )
            .await
            .map_err(write_failed("spec"))?;
        Ok(removed > 0)
    }

    async fn list(&self, status: Option<DeploymentStatus>) -> StorageResult<Vec<UnitSpec>> {
        let conn = self.db.get_conn().await?;
        let status = status.map(|s| s.as_db_str());
        let sql = format!(
            "SELECT {} FROM prefab_specs WHERE ($1::text IS NULL OR deployment_status = $1) \
             ORDER BY unit_id, version",
            SPEC_COLUMNS
        );
        let rows = conn
            .query(&sql, &[&status])
            .await
            .map_err(read_failed("spec"))?;
        rows.iter().map(spec_from_row).collect()
    }
}

// ============================================================================
// SECRETS
// ============================================================================

const SECRET_COLUMNS: &str = "user_id, unit_id, secret_name, encrypted_value, encryption_key_id, \
     description, status, created_at, updated_at, last_used_at";

fn secret_from_row(row: &Row) -> StorageResult<SecretRecord> {
    let status: String = column(row, "status")?;
    Ok(SecretRecord {
        user_id: column(row, "user_id")?,
        unit_id: column(row, "unit_id")?,
        secret_name: column(row, "secret_name")?,
        encrypted_value: column(row, "encrypted_value")?,
        encryption_key_id: column(row, "encryption_key_id")?,
        description: column(row, "description")?,
        status: SecretStatus::from_db_str(&status)
            .map_err(|e| StorageError::Serialization(e.to_string()))?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
        last_used_at: column(row, "last_used_at")?,
    })
}

/// `user_secrets` table.
#[derive(Clone)]
pub struct PgSecretStore {
    db: DbClient,
}

impl PgSecretStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SecretStore for PgSecretStore {
    async fn upsert(&self, record: SecretRecord) -> StorageResult<()> {
        let conn = self.db.get_conn().await?;
        conn.execute(
            "INSERT INTO user_secrets (user_id, unit_id, secret_name, encrypted_value, \
             encryption_key_id, description, status, created_at, updated_at, last_used_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (user_id, unit_id, secret_name) DO UPDATE SET \
             encrypted_value = EXCLUDED.encrypted_value, \
             encryption_key_id = EXCLUDED.encryption_key_id, \
             description = EXCLUDED.description, status = EXCLUDED.status, \
             updated_at = EXCLUDED.updated_at",
            &[
                &record.user_id,
                &record.unit_id,
                &record.secret_name,
                &record.encrypted_value,
                &record.encryption_key_id,
                &record.description,
                &record.status.as_db_str(),
                &record.created_at,
                &record.updated_at,
                &record.last_used_at,
            ],
        )
        .await
        .map_err(write_failed("secret"))?;
        Ok(())
    }

    async fn get_active(&self, key: &SecretKey) -> StorageResult<Option<SecretRecord>> {
        let conn = self.db.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM user_secrets WHERE user_id = $1 AND unit_id = $2 \
             AND secret_name = $3 AND status = 'ACTIVE'",
            SECRET_COLUMNS
        );
        let row = conn
            .query_opt(&sql, &[&key.user_id, &key.unit_id, &key.secret_name])
            .await
            .map_err(read_failed("secret"))?;
        row.as_ref().map(secret_from_row).transpose()
    }

    async fn touch(&self, key: &SecretKey, at: Timestamp) -> StorageResult<()> {
        let conn = self.db.get_conn().await?;
        conn.execute(
            "UPDATE user_secrets SET last_used_at = $4 \
             WHERE user_id = $1 AND unit_id = $2 AND secret_name = $3",
            &[&key.user_id, &key.unit_id, &key.secret_name, &at],
        )
        .await
        .map_err(write_failed("secret"))?;
        Ok(())
    }

    async fn disable(&self, key: &SecretKey, at: Timestamp) -> StorageResult<bool> {
        let conn = self.db.get_conn().await?;
        let changed = conn
            .execute(
                "UPDATE user_secrets SET status = 'DISABLED', updated_at = $4 \
                 WHERE user_id = $1 AND unit_id = $2 AND secret_name = $3 AND status = 'ACTIVE'",
                &[&key.user_id, &key.unit_id, &key.secret_name, &at],
            )
            .await
            .map_err(write_failed("secret"))?;
        Ok(changed > 0)
    }

    async fn list_active(
        &self,
        user_id: &str,
        unit_id: Option<&str>,
    ) -> StorageResult<Vec<SecretRecord>> {
        let conn = self.db.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM user_secrets WHERE user_id = $1 AND status = 'ACTIVE' \
             AND ($2::text IS NULL OR unit_id = $2) ORDER BY unit_id, secret_name",
            SECRET_COLUMNS
        );
        let rows = conn
            .query(&sql, &[&user_id, &unit_id])
            .await
            .map_err(read_failed("secret"))?;
        rows.iter().map(secret_from_row).collect()
    }

    async fn list_not_under_key(&self, key_id: &str) -> StorageResult<Vec<SecretRecord>> {
        let conn = self.db.get_conn().await?;
        let sql = format!(
            "SELECT {} FROM user_secrets WHERE encryption_key_id <> $1",
            SECRET_COLUMNS
        );
        let rows = conn
            .query(&sql, &[&key_id])
            .await
            .map_err(read_failed("secret"))?;
        rows.iter().map(secret_from_row).collect()
    }

    async fn replace_ciphertext(
        &self,
        key: &SecretKey,
        previous: &str,
        encrypted_value: &str,
        key_id: &str,
        at: Timestamp,
    ) -> StorageResult<bool> {
        let conn = self.db.get_conn().await?;
        let changed = conn
            .execute(
                "UPDATE user_secrets SET encrypted_value = $5, encryption_key_id = $6, \
                 updated_at = $7 WHERE user_id = $1 AND unit_id = $2 AND secret_name = $3 \
                 AND encrypted_value = $4",
                &[
                    &key.user_id,
                    &key.unit_id,
                    &key.secret_name,
                    &previous,
                    &encrypted_value,
                    &key_id,
                    &at,
                ],
            )
            .await
            .map_err(write_failed("secret"))?;
        Ok(changed > 0)
    }
}

// ============================================================================
// ACCESS GRANTS
// ============================================================================

/// `access_grants` table.
#[derive(Clone)]
pub struct PgGrantStore {
    db: DbClient,
}

impl PgGrantStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }
}

#[async_trait]
impl GrantStore for PgGrantStore {
    async fn grant(&self, user_id: &str, resource_uri: &str, at: Timestamp) -> StorageResult<bool> {
        let conn = self.db.get_conn().await?;
        let inserted = conn
            .execute(
                "INSERT INTO access_grants (user_id, resource_uri, granted_at) \
                 VALUES ($1, $2, $3) ON CONFLICT (user_id, resource_uri) DO NOTHING",
                &[&user_id, &resource_uri, &at],
            )
            .await
            .map_err(write_failed("grant"))?;
        Ok(inserted > 0)
    }

    async fn contains(&self, user_id: &str, resource_uri: &str) -> StorageResult<bool> {
        let conn = self.db.get_conn().await?;
        let row = conn
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM access_grants \
                 WHERE user_id = $1 AND resource_uri = $2)",
                &[&user_id, &resource_uri],
            )
            .await
            .map_err(read_failed("grant"))?;
        row.try_get(0)
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    async fn revoke(&self, user_id: &str, resource_uri: &str) -> StorageResult<bool> {
        let conn = self.db.get_conn().await?;
        let removed = conn
            .execute(
                "DELETE FROM access_grants WHERE user_id = $1 AND resource_uri = $2",
                &[&user_id, &resource_uri],
            )
            .await
            .map_err(write_failed("grant"))?;
        Ok(removed > 0)
    }

    async fn list(&self, user_id: &str) -> StorageResult<Vec<AccessGrant>> {
        let conn = self.db.get_conn().await?;
        let rows = conn
            .query(
                "SELECT user_id, resource_uri, granted_at FROM access_grants \
                 WHERE user_id = $1 ORDER BY granted_at, resource_uri",
                &[&user_id],
            )
            .await
            .map_err(read_failed("grant"))?;
        rows.iter()
            .map(|row| {
                Ok(AccessGrant {
                    user_id: column(row, "user_id")?,
                    resource_uri: column(row, "resource_uri")?,
                    granted_at: column(row, "granted_at")?,
                })
            })
            .collect()
    }
}

// ============================================================================
// WEBHOOK EVENTS
// ============================================================================

const EVENT_COLUMNS: &str = "event_id, source, event_type, unit_id, version, payload, processed, \
     processed_at, retry_count, processing_error, signature, received_at, outcome";

fn event_from_row(row: &Row) -> StorageResult<WebhookEvent> {
    Ok(WebhookEvent {
        event_id: column(row, "event_id")?,
        source: column(row, "source")?,
        event_type: column(row, "event_type")?,
        unit_id: column(row, "unit_id")?,
        version: column(row, "version")?,
        payload: column(row, "payload")?,
        processed: column(row, "processed")?,
        processed_at: column(row, "processed_at")?,
        retry_count: column(row, "retry_count")?,
        processing_error: column(row, "processing_error")?,
        signature: column(row, "signature")?,
        received_at: column(row, "received_at")?,
        outcome: column(row, "outcome")?,
    })
}

/// `webhook_events` table.
#[derive(Clone)]
pub struct PgEventStore {
    db: DbClient,
}

impl PgEventStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn get(&self, event_id: &str) -> StorageResult<Option<WebhookEvent>> {
        let conn = self.db.get_conn().await?;
        let sql = format!("SELECT {} FROM webhook_events WHERE event_id = $1", EVENT_COLUMNS);
        let row = conn
            .query_opt(&sql, &[&event_id])
            .await
            .map_err(read_failed("webhook event"))?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn insert_if_absent(&self, event: &WebhookEvent) -> StorageResult<WebhookEvent> {
        let conn = self.db.get_conn().await?;
        conn.execute(
            "INSERT INTO webhook_events (event_id, source, event_type, unit_id, version, \
             payload, processed, processed_at, retry_count, processing_error, signature, \
             received_at, outcome) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (event_id) DO NOTHING",
            &[
                &event.event_id,
                &event.source,
                &event.event_type,
                &event.unit_id,
                &event.version,
                &event.payload,
                &event.processed,
                &event.processed_at,
                &event.retry_count,
                &event.processing_error,
                &event.signature,
                &event.received_at,
                &event.outcome,
            ],
        )
        .await
        .map_err(write_failed("webhook event"))?;

        let sql = format!("SELECT {} FROM webhook_events WHERE event_id = $1", EVENT_COLUMNS);
        let row = conn
            .query_one(&sql, &[&event.event_id])
            .await
            .map_err(read_failed("webhook event"))?;
        event_from_row(&row)
    }

    async fn mark_processed(
        &self,
        event_id: &str,
        at: Timestamp,
        outcome: &JsonValue,
    ) -> StorageResult<bool> {
        let conn = self.db.get_conn().await?;
        let changed = conn
            .execute(
                "UPDATE webhook_events SET processed = TRUE, processed_at = $2, outcome = $3, \
                 processing_error = NULL WHERE event_id = $1 AND processed = FALSE",
                &[&event_id, &at, outcome],
            )
            .await
            .map_err(write_failed("webhook event"))?;
        if changed > 0 {
            return Ok(true);
        }
        let exists = conn
            .query_opt("SELECT 1 FROM webhook_events WHERE event_id = $1", &[&event_id])
            .await
            .map_err(read_failed("webhook event"))?;
        if exists.is_none() {
            return Err(StorageError::NotFound {
                entity: "webhook event",
                key: event_id.to_string(),
            });
        }
        Ok(false)
    }

    async fn record_failure(&self, event_id: &str, error: &str) -> StorageResult<()> {
        let conn = self.db.get_conn().await?;
        let changed = conn
            .execute(
                "UPDATE webhook_events SET processing_error = $2, retry_count = retry_count + 1 \
                 WHERE event_id = $1",
                &[&event_id, &error],
            )
            .await
            .map_err(write_failed("webhook event"))?;
        if changed == 0 {
            return Err(StorageError::NotFound {
                entity: "webhook event",
                key: event_id.to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// AUDIT LOG
// ============================================================================

/// `audit_logs` table.
#[derive(Clone)]
pub struct PgAuditLog {
    db: DbClient,
}

impl PgAuditLog {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn append(&self, entry: &AuditEntry) -> StorageResult<()> {
        let conn = self.db.get_conn().await?;
        conn.execute(
            "INSERT INTO audit_logs (id, request_id, user_id, action, resource_type, \
             resource_id, endpoint, method, success, error_code, duration_ms, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            &[
                &entry.id,
                &entry.request_id,
                &entry.user_id,
                &entry.action,
                &entry.resource_type,
                &entry.resource_id,
                &entry.endpoint,
                &entry.method,
                &entry.success,
                &entry.error_code,
                &entry.duration_ms,
                &entry.created_at,
            ],
        )
        .await
        .map_err(write_failed("audit entry"))?;
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> StorageResult<Vec<AuditEntry>> {
        let conn = self.db.get_conn().await?;
        let limit = query
            .limit
            .unwrap_or(DEFAULT_AUDIT_LIMIT)
            .min(MAX_AUDIT_LIMIT) as i64;
        let rows = conn
            .query(
                "SELECT id, request_id, user_id, action, resource_type, resource_id, endpoint, \
                 method, success, error_code, duration_ms, created_at FROM audit_logs \
                 WHERE ($1::text IS NULL OR user_id = $1) AND ($2::text IS NULL OR action = $2) \
                 ORDER BY created_at DESC LIMIT $3",
                &[&query.user_id, &query.action, &limit],
            )
            .await
            .map_err(read_failed("audit entry"))?;
        rows.iter()
            .map(|row| {
                Ok(AuditEntry {
                    id: column(row, "id")?,
                    request_id: column(row, "request_id")?,
                    user_id: column(row, "user_id")?,
                    action: column(row, "action")?,
                    resource_type: column(row, "resource_type")?,
                    resource_id: column(row, "resource_id")?,
                    endpoint: column(row, "endpoint")?,
                    method: column(row, "method")?,
                    success: column(row, "success")?,
                    error_code: column(row, "error_code")?,
                    duration_ms: column(row, "duration_ms")?,
                    created_at: column(row, "created_at")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_defaults() {
        let config = DbConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "prefab");
        assert_eq!(config.max_size, 16);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_db_config_debug_hides_password() {
        let config = DbConfig {
            password: SecretString::from("hunter2"),
            ..DbConfig::default()
        };
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[tokio::test]
    async fn test_pool_creation_is_lazy() {
        // deadpool connects on first checkout, so building a pool against an
        // unreachable host succeeds.
        let config = DbConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            timeout: Duration::from_millis(200),
            ..DbConfig::default()
        };
        let db = DbClient::from_config(&config).unwrap();
        assert_eq!(db.pool_size(), 0);
        let err = PgGrantStore::new(db).contains("u", "s3://b/k").await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
    }
}
