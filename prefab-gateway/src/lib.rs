//! Prefab Gateway - HTTP Surface
//!
//! Single entry point for agents calling independently deployed prefab
//! units. The gateway authenticates callers, resolves each call against a
//! published unit spec, injects the caller's secrets, stages input and
//! output files, invokes the unit over HTTP and reports per-call results.
//!
//! The build pipeline reports deployment progress through a signed
//! webhook, which drives the spec's deployment status.

pub mod acl;
pub mod auth;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod db;
pub mod error;
pub mod jobs;
pub mod macros;
pub mod middleware;
#[cfg(feature = "openapi")]
pub mod openapi;
pub mod orchestrator;
pub mod routes;
pub mod spec_cache;
pub mod state;
pub mod telemetry;
pub mod vault;
pub mod webhook;
pub mod workspace;

// Re-export commonly used types
pub use acl::Acl;
pub use auth::{authenticate_bearer, generate_jwt_token, validate_jwt_token, AuthConfig, Claims};
pub use config::{ApiConfig, GatewayConfig, InvokeConfig, StorageMode, WorkspaceConfig};
pub use db::{DbClient, DbConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::{auth_middleware, AuthMiddlewareState, Caller};
#[cfg(feature = "openapi")]
pub use openapi::ApiDoc;
pub use orchestrator::{HttpUnitInvoker, Orchestrator, ResolvedSecrets, UnitInvoker};
pub use routes::create_api_router;
pub use spec_cache::{PublishMeta, SpecCache};
pub use state::{AppState, Collaborators, Stores};
pub use vault::Vault;
pub use webhook::{sign_body, WebhookAck, WebhookProcessor};
pub use workspace::{LocalObjectStore, ObjectStore, WorkspaceManager};
