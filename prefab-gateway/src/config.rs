//! Gateway Configuration
//!
//! Configuration is loaded from environment variables with development
//! defaults. Each component also exposes its own `from_env` where it owns
//! the settings (auth, database, object store).

use crate::constants::{
    DEFAULT_CORS_MAX_AGE_SECS, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_KNATIVE_DOMAIN_SUFFIX,
    DEFAULT_KNATIVE_NAMESPACE, DEFAULT_LMDB_MAX_SIZE_MB, DEFAULT_SPEC_CACHE_TTL_SECS,
    DEFAULT_WORKSPACE_MAX_AGE_SECS, DEFAULT_WORKSPACE_SWEEP_INTERVAL_SECS,
    INSECURE_DEFAULT_ENCRYPTION_KEY,
};
use crate::env_or;
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// HTTP surface configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: DEFAULT_CORS_MAX_AGE_SECS,
        }
    }
}

impl ApiConfig {
    /// Environment variables:
    /// - `PREFAB_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `PREFAB_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `PREFAB_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    pub fn from_env() -> Self {
        let cors_origins = std::env::var("PREFAB_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_allow_credentials = std::env::var("PREFAB_CORS_ALLOW_CREDENTIALS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        Self {
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs: env_or!("PREFAB_CORS_MAX_AGE_SECS", DEFAULT_CORS_MAX_AGE_SECS),
        }
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // Wildcard subdomains: *.example.com
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain.ends_with(&format!(".{}", pattern));
                }
            }
            false
        })
    }
}

// ============================================================================
// STORAGE MODE
// ============================================================================

/// Durable tier backing the stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    #[default]
    Postgres,
    /// Process memory. Development and tests only.
    Memory,
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(format!("unknown storage mode '{}'", other)),
        }
    }
}

// ============================================================================
// DOWNSTREAM INVOCATION
// ============================================================================

/// Addressing and timeout for deployed units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeConfig {
    pub namespace: String,
    pub domain_suffix: String,
    pub timeout: Duration,
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_KNATIVE_NAMESPACE.to_string(),
            domain_suffix: DEFAULT_KNATIVE_DOMAIN_SUFFIX.to_string(),
            timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl InvokeConfig {
    pub fn from_env() -> Self {
        Self {
            namespace: std::env::var("PREFAB_KNATIVE_NAMESPACE")
                .unwrap_or_else(|_| DEFAULT_KNATIVE_NAMESPACE.to_string()),
            domain_suffix: std::env::var("PREFAB_KNATIVE_DOMAIN_SUFFIX")
                .unwrap_or_else(|_| DEFAULT_KNATIVE_DOMAIN_SUFFIX.to_string()),
            timeout: Duration::from_secs(env_or!(
                "PREFAB_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS
            )),
        }
    }

    /// `http://{unit_id}.{namespace}.{domain_suffix}/invoke/{function}`
    pub fn invoke_url(&self, unit_id: &str, function_name: &str) -> String {
        format!(
            "http://{}.{}.{}/invoke/{}",
            unit_id, self.namespace, self.domain_suffix, function_name
        )
    }
}

// ============================================================================
// WORKSPACES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceConfig {
    /// Root for per-job directories. `None` selects pass-through mode.
    pub root: Option<PathBuf>,
    pub max_age: Duration,
    pub sweep_interval: Duration,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: None,
            max_age: Duration::from_secs(DEFAULT_WORKSPACE_MAX_AGE_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_WORKSPACE_SWEEP_INTERVAL_SECS),
        }
    }
}

impl WorkspaceConfig {
    pub fn from_env() -> Self {
        Self {
            root: std::env::var("PREFAB_WORKSPACE_ROOT")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            max_age: Duration::from_secs(env_or!(
                "PREFAB_WORKSPACE_MAX_AGE_SECS",
                DEFAULT_WORKSPACE_MAX_AGE_SECS
            )),
            sweep_interval: Duration::from_secs(env_or!(
                "PREFAB_WORKSPACE_SWEEP_INTERVAL_SECS",
                DEFAULT_WORKSPACE_SWEEP_INTERVAL_SECS
            )),
        }
    }
}

// ============================================================================
// GATEWAY CONFIGURATION
// ============================================================================

/// Everything `main` needs to assemble the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Deployment environment name (`PREFAB_ENVIRONMENT`).
    pub environment: String,
    pub storage: StorageMode,
    pub api: ApiConfig,
    pub invoke: InvokeConfig,
    pub workspace: WorkspaceConfig,

    pub spec_cache_ttl: Duration,
    /// LMDB directory for the fast tier. `None` selects the process-local tier.
    pub lmdb_path: Option<PathBuf>,
    pub lmdb_max_size_mb: usize,

    pub encryption_key: SecretString,
    /// Key material that was current before the last rotation.
    pub encryption_key_previous: Option<SecretString>,
    /// Shared secret for webhook HMAC verification. `None` disables the check.
    pub webhook_secret: Option<SecretString>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            storage: StorageMode::default(),
            api: ApiConfig::default(),
            invoke: InvokeConfig::default(),
            workspace: WorkspaceConfig::default(),
            spec_cache_ttl: Duration::from_secs(DEFAULT_SPEC_CACHE_TTL_SECS),
            lmdb_path: None,
            lmdb_max_size_mb: DEFAULT_LMDB_MAX_SIZE_MB,
            encryption_key: SecretString::from(INSECURE_DEFAULT_ENCRYPTION_KEY),
            encryption_key_previous: None,
            webhook_secret: None,
        }
    }
}

fn secret_var(name: &str) -> Option<SecretString> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(SecretString::from)
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            environment: std::env::var("PREFAB_ENVIRONMENT").unwrap_or(defaults.environment),
            storage: std::env::var("PREFAB_STORAGE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.storage),
            api: ApiConfig::from_env(),
            invoke: InvokeConfig::from_env(),
            workspace: WorkspaceConfig::from_env(),
            spec_cache_ttl: Duration::from_secs(env_or!(
                "PREFAB_SPEC_CACHE_TTL_SECS",
                DEFAULT_SPEC_CACHE_TTL_SECS
            )),
            lmdb_path: std::env::var("PREFAB_LMDB_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            lmdb_max_size_mb: env_or!("PREFAB_LMDB_MAX_SIZE_MB", DEFAULT_LMDB_MAX_SIZE_MB),
            encryption_key: secret_var("PREFAB_ENCRYPTION_KEY")
                .unwrap_or(defaults.encryption_key),
            encryption_key_previous: secret_var("PREFAB_ENCRYPTION_KEY_PREVIOUS"),
            webhook_secret: secret_var("PREFAB_WEBHOOK_SECRET"),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(
            self.environment.to_ascii_lowercase().as_str(),
            "production" | "prod"
        )
    }
}
