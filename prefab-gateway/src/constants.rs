//! Constants for the prefab gateway
//!
//! Defaults for every tunable, grouped by the component that reads them.

// ============================================================================
// AUTHENTICATION
// ============================================================================

/// Required `aud` claim on every bearer token
pub const JWT_AUDIENCE: &str = "prefab-gateway";

/// Lifetime of tokens minted by the gateway itself (1 hour)
pub const DEFAULT_JWT_EXPIRATION_SECS: i64 = 3600;

/// Clock skew tolerated on `exp`/`nbf`
pub const DEFAULT_JWT_LEEWAY_SECS: i64 = 60;

/// Minimum required length for JWT secret keys in production
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

/// Placeholder secret used when none is configured. Refused in production.
pub const INSECURE_DEFAULT_JWT_SECRET: &str = "INSECURE_DEFAULT_SECRET_CHANGE_IN_PRODUCTION";

/// Scope required to publish unit specs
pub const SPEC_WRITE_SCOPE: &str = "spec:write";

// ============================================================================
// CORS
// ============================================================================

/// Default CORS max age in seconds (24 hours)
pub const DEFAULT_CORS_MAX_AGE_SECS: u64 = 86400;

// ============================================================================
// VAULT
// ============================================================================

/// Development key material used when `PREFAB_ENCRYPTION_KEY` is unset.
pub const INSECURE_DEFAULT_ENCRYPTION_KEY: &str = "INSECURE_DEFAULT_ENCRYPTION_KEY_CHANGE_ME";

/// Hex characters of the key fingerprint stored beside each ciphertext
pub const KEY_FINGERPRINT_HEX_LEN: usize = 16;

// ============================================================================
// SPEC CACHE
// ============================================================================

/// Fast-tier TTL for cached specs (1 hour)
pub const DEFAULT_SPEC_CACHE_TTL_SECS: u64 = 3600;

/// LMDB map size for the fast tier
pub const DEFAULT_LMDB_MAX_SIZE_MB: usize = 256;

// ============================================================================
// DOWNSTREAM INVOCATION
// ============================================================================

pub const DEFAULT_KNATIVE_NAMESPACE: &str = "default";

pub const DEFAULT_KNATIVE_DOMAIN_SUFFIX: &str = "svc.cluster.local";

/// Hard timeout on a single downstream invocation
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Maximum number of calls in one `/v1/run` batch
pub const MAX_BATCH_CALLS: usize = 100;

// ============================================================================
// WORKSPACES
// ============================================================================

pub const DEFAULT_WORKSPACE_SWEEP_INTERVAL_SECS: u64 = 300;

pub const DEFAULT_WORKSPACE_MAX_AGE_SECS: u64 = 3600;

/// Disk utilization that triggers a warning after a sweep
pub const DISK_WARN_THRESHOLD: f64 = 0.80;

/// Disk utilization that triggers an alert after a sweep
pub const DISK_ALERT_THRESHOLD: f64 = 0.90;

pub const DEFAULT_S3_REGION: &str = "us-east-1";

// ============================================================================
// WEBHOOKS
// ============================================================================

/// Header carrying the hex HMAC-SHA256 of the raw webhook body
pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-webhook-signature";

// ============================================================================
// AUDIT
// ============================================================================

/// Largest page the audit query endpoint returns
pub const MAX_AUDIT_LIMIT: usize = 1000;

// ============================================================================
// SERVER
// ============================================================================

pub const DEFAULT_PORT: u16 = 3000;

pub const SERVICE_NAME: &str = "prefab-gateway";
