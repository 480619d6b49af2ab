//! Health Check Endpoints
//!
//! Provides Kubernetes-compatible health check endpoints:
//! - /health - Overall status with component details
//! - /health/live - Process alive check
//! - /health/ready - Durable store and fast tier check
//!
//! No authentication required for health endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::constants::SERVICE_NAME;
use crate::db::DbClient;
use crate::jobs::WorkspaceReclaimSnapshot;
use crate::spec_cache::SpecCache;
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthDetails {
    /// `null` when running on in-memory storage.
    pub database: Option<ComponentHealth>,
    pub spec_cache: ComponentHealth,
    /// `null` in pass-through mode.
    pub workspaces: Option<WorkspaceReclaimSnapshot>,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn healthy(latency_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            backend: None,
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    fn failing(status: HealthStatus, error: String) -> Self {
        Self {
            status,
            backend: None,
            latency_ms: None,
            error: Some(error),
        }
    }
}

/// Body of `GET /`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub environment: String,
    pub storage: String,
    pub workspace_mode: String,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET / - Service identification
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/",
    tag = "Health",
    responses(
        (status = 200, description = "Service name and mode", body = ServiceInfo),
    ),
))]
pub async fn service_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(ServiceInfo {
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.config.environment.clone(),
        storage: if state.db.is_some() { "postgres" } else { "memory" }.to_string(),
        workspace_mode: if state.workspaces.is_staging() {
            "staging"
        } else {
            "pass_through"
        }
        .to_string(),
    })
}

/// GET /health/live - Process liveness check
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Process is alive", body = HealthResponse),
    ),
))]
pub async fn liveness() -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Process is alive".to_string()),
        details: None,
    };
    (StatusCode::OK, Json(response))
}

/// GET /health/ready - Readiness check
///
/// Unhealthy when the durable store cannot be reached. A failing fast tier
/// only degrades the service since lookups fall through to the durable
/// store.
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse),
        (status = 503, description = "Service is not ready", body = HealthResponse),
    ),
))]
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let response = check_components(&state).await;
    let status_code = if response.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status_code, Json(response))
}

/// GET /health - Same checks as readiness, always 200
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Component status", body = HealthResponse),
    ),
))]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(check_components(&state).await)
}

async fn check_components(state: &AppState) -> HealthResponse {
    let database = match &state.db {
        Some(db) => Some(check_database(db).await),
        None => None,
    };
    let spec_cache = check_spec_cache(&state.specs).await;
    let workspaces = state
        .workspaces
        .is_staging()
        .then(|| state.reclaim_metrics.snapshot());

    let status = if database
        .as_ref()
        .is_some_and(|d| d.status == HealthStatus::Unhealthy)
    {
        HealthStatus::Unhealthy
    } else if spec_cache.status != HealthStatus::Healthy {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    HealthResponse {
        status,
        message: None,
        details: Some(HealthDetails {
            database,
            spec_cache,
            workspaces,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
        }),
    }
}

async fn check_database(db: &DbClient) -> ComponentHealth {
    let start = Instant::now();
    match db.ping().await {
        Ok(()) => ComponentHealth::healthy(start.elapsed().as_millis() as u64),
        Err(e) => ComponentHealth::failing(
            HealthStatus::Unhealthy,
            format!("Database check failed: {}", e.message),
        ),
    }
}

async fn check_spec_cache(specs: &SpecCache) -> ComponentHealth {
    let start = Instant::now();
    let mut health = match specs.fast_stats().await {
        Ok(_) => ComponentHealth::healthy(start.elapsed().as_millis() as u64),
        Err(e) => ComponentHealth::failing(HealthStatus::Degraded, e.to_string()),
    };
    health.backend = Some(specs.fast_backend().to_string());
    health
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create health check router (no auth required)
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(health))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: HealthStatus::Healthy,
            message: Some("All systems operational".to_string()),
            details: None,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(!json.contains("details"));
    }

    #[test]
    fn test_component_health_with_error() {
        let component =
            ComponentHealth::failing(HealthStatus::Degraded, "fast tier offline".to_string());

        let json = serde_json::to_string(&component).unwrap();
        assert!(json.contains("\"status\":\"degraded\""));
        assert!(json.contains("fast tier offline"));
        assert!(!json.contains("latency_ms"));
    }
}
