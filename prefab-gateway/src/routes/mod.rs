//! REST API Routes Module
//!
//! Route handlers grouped by resource, and the builder that assembles them
//! behind the gateway's security stack.
//!
//! Includes:
//! - Batch execution, secrets, specs and file grants under /v1/*
//! - Administrative routes under /v1/admin/* (admin scope)
//! - Deployment webhook receiver and event queries under /webhooks/*
//! - Health checks, metrics and the OpenAPI document (public)

pub mod admin;
pub mod files;
pub mod health;
pub mod prefabs;
pub mod run;
pub mod secrets;
pub mod webhooks;

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use secrecy::ExposeSecret;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;
use crate::config::{ApiConfig, GatewayConfig};
use crate::constants::INSECURE_DEFAULT_ENCRYPTION_KEY;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{
    admin_middleware, audit_middleware, auth_middleware, AuditState, AuthMiddlewareState,
};
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

// ============================================================================
// OPENAPI ENDPOINT
// ============================================================================

/// Handler for /openapi.json endpoint.
#[cfg(feature = "openapi")]
async fn openapi_json() -> impl axum::response::IntoResponse {
    use utoipa::OpenApi;
    axum::Json(crate::openapi::ApiDoc::openapi())
}

// ============================================================================
// PRODUCTION VALIDATION
// ============================================================================

/// Refuse to start a production gateway with development defaults.
pub fn validate_for_production(config: &GatewayConfig, auth: &AuthConfig) -> ApiResult<()> {
    if !config.is_production() {
        return Ok(());
    }
    auth.validate_for_production(true)?;
    if config.encryption_key.expose_secret() == INSECURE_DEFAULT_ENCRYPTION_KEY {
        return Err(ApiError::invalid_input(
            "Vault encryption key not configured for production. Set PREFAB_ENCRYPTION_KEY.",
        ));
    }
    if config.api.cors_origins.is_empty() {
        return Err(ApiError::invalid_input(
            "CORS origins not configured for production. Set PREFAB_CORS_ORIGINS.",
        ));
    }
    if config.webhook_secret.is_none() {
        tracing::warn!(
            "Webhook signature verification is disabled in production. \
             Set PREFAB_WEBHOOK_SECRET to enable it."
        );
    }
    Ok(())
}

// ============================================================================
// SECURE ROUTER BUILDER
// ============================================================================

/// Builder for the gateway router with auth by default.
///
/// Every /v1 route and the webhook event query pass through:
/// 1. CORS layer
/// 2. Request tracing and observability middleware
/// 3. Authentication middleware (bearer JWT)
/// 4. Audit middleware
///
/// Public routes (root, health, metrics, OpenAPI, webhook receiver) skip
/// steps 3 and 4.
pub struct SecureRouterBuilder {
    state: AppState,
    auth_state: AuthMiddlewareState,
    audit_state: AuditState,
}

impl SecureRouterBuilder {
    /// In production this validates the security configuration and returns
    /// an error if critical settings are missing.
    pub fn new(state: AppState) -> ApiResult<Self> {
        validate_for_production(&state.config, &state.auth)?;
        let auth_state = AuthMiddlewareState {
            auth_config: state.auth.clone(),
        };
        let audit_state = AuditState::new(state.audit.clone());
        Ok(Self {
            state,
            auth_state,
            audit_state,
        })
    }

    /// Routes under /v1 (require authentication).
    fn build_api_routes(&self) -> Router<AppState> {
        let admin_routes = admin::create_router().layer(from_fn(admin_middleware));

        Router::new()
            .nest("/run", run::create_router())
            .nest("/secrets", secrets::create_router())
            .nest("/prefabs", prefabs::create_router())
            .nest("/files", files::create_router())
            .nest("/admin", admin_routes)
            .layer(from_fn_with_state(self.audit_state.clone(), audit_middleware))
            .layer(from_fn_with_state(self.auth_state.clone(), auth_middleware))
    }

    /// Build the complete router with full security stack.
    ///
    /// # Middleware Order (outer to inner)
    /// 1. CORS (outermost) - handles preflight requests
    /// 2. TraceLayer and observability - spans and metrics
    /// 3. Auth, then audit (only on /v1/* and /webhooks/events/*)
    pub fn build(self) -> Router {
        let webhook_routes = webhooks::create_receiver_router().nest(
            "/events",
            webhooks::create_events_router()
                .layer(from_fn_with_state(self.auth_state.clone(), auth_middleware)),
        );

        #[allow(unused_mut)]
        let mut router = Router::new()
            .route("/", get(health::service_info))
            .nest("/v1", self.build_api_routes())
            .nest("/webhooks", webhook_routes)
            .nest("/health", health::create_router())
            .with_state(self.state.clone())
            .route("/metrics", get(metrics_handler));

        #[cfg(feature = "openapi")]
        {
            router = router.route("/openapi.json", get(openapi_json));
        }

        let cors = build_cors_layer(&self.state.config.api);

        router
            .layer(from_fn(observability_middleware))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }
}

// ============================================================================
// CORS LAYER
// ============================================================================

/// Build the CORS layer from ApiConfig.
///
/// In development mode (empty origins), allows all origins.
/// In production mode, only allows configured origins.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any).allow_headers(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        if config.cors_allow_credentials {
            cors.allow_origin(origins).allow_credentials(true)
        } else {
            cors.allow_origin(origins)
        }
    }
}

/// Create the complete gateway router.
///
/// # Security
/// - All /v1/* routes and /webhooks/events/* require a bearer token
/// - /v1/admin/* additionally requires the admin scope
/// - /webhooks/factory is authenticated by body signature instead
/// - In production, validates security configuration at startup
pub fn create_api_router(state: AppState) -> ApiResult<Router> {
    SecureRouterBuilder::new(state).map(SecureRouterBuilder::build)
}
