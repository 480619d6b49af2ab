//! Vault REST API Routes
//!
//! Callers manage their own per-unit secrets. Values go in; only names and
//! timestamps ever come back out.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use prefab_core::{SecretKey, SecretSummary};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::middleware::Caller;
use crate::state::AppState;
use crate::vault::Vault;

// ============================================================================
// REQUEST/RESPONSE TYPES
// ============================================================================

/// Body of `POST /v1/secrets`.
#[derive(Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StoreSecretRequest {
    pub unit_id: String,
    pub secret_name: String,
    pub secret_value: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl std::fmt::Debug for StoreSecretRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSecretRequest")
            .field("unit_id", &self.unit_id)
            .field("secret_name", &self.secret_name)
            .field("secret_value", &"[REDACTED]")
            .field("description", &self.description)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
pub struct ListSecretsParams {
    /// Restrict the listing to one unit.
    pub unit_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ListSecretsResponse {
    pub secrets: Vec<SecretSummary>,
    pub total: usize,
}

impl From<Vec<SecretSummary>> for ListSecretsResponse {
    fn from(secrets: Vec<SecretSummary>) -> Self {
        Self {
            total: secrets.len(),
            secrets,
        }
    }
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /v1/secrets - Store or replace a secret
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/secrets",
    tag = "Secrets",
    request_body = StoreSecretRequest,
    responses(
        (status = 204, description = "Secret stored"),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 422, description = "Empty unit id, name or value", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn store_secret(
    State(vault): State<Arc<Vault>>,
    Caller(identity): Caller,
    Json(req): Json<StoreSecretRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.secret_value.is_empty() {
        return Err(ApiError::validation_failed("secret_value must not be empty"));
    }
    let key = SecretKey::new(&identity.user_id, req.unit_id, req.secret_name);
    vault.store(&key, &req.secret_value, req.description).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/secrets - List the caller's secrets
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/secrets",
    tag = "Secrets",
    params(ListSecretsParams),
    responses(
        (status = 200, description = "Secret names, never values", body = ListSecretsResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn list_secrets(
    State(vault): State<Arc<Vault>>,
    Caller(identity): Caller,
    Query(params): Query<ListSecretsParams>,
) -> ApiResult<impl IntoResponse> {
    let secrets = vault
        .list(&identity.user_id, params.unit_id.as_deref())
        .await?;
    Ok(Json(ListSecretsResponse::from(secrets)))
}

/// GET /v1/secrets/{unit_id} - List the caller's secrets for one unit
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/secrets/{unit_id}",
    tag = "Secrets",
    params(("unit_id" = String, Path, description = "Unit identifier")),
    responses(
        (status = 200, description = "Secret names, never values", body = ListSecretsResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn list_unit_secrets(
    State(vault): State<Arc<Vault>>,
    Caller(identity): Caller,
    Path(unit_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let secrets = vault.list(&identity.user_id, Some(&unit_id)).await?;
    Ok(Json(ListSecretsResponse::from(secrets)))
}

/// DELETE /v1/secrets/{unit_id}/{secret_name} - Disable a secret
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/v1/secrets/{unit_id}/{secret_name}",
    tag = "Secrets",
    params(
        ("unit_id" = String, Path, description = "Unit identifier"),
        ("secret_name" = String, Path, description = "Secret name"),
    ),
    responses(
        (status = 204, description = "Secret disabled (or was already absent)"),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn delete_secret(
    State(vault): State<Arc<Vault>>,
    Caller(identity): Caller,
    Path((unit_id, secret_name)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let key = SecretKey::new(&identity.user_id, unit_id, secret_name);
    vault.delete(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_secrets).post(store_secret))
        .route("/:unit_id", get(list_unit_secrets))
        .route("/:unit_id/:secret_name", delete(delete_secret))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_request_debug_redacts_value() {
        let req: StoreSecretRequest = serde_json::from_value(serde_json::json!({
            "unit_id": "weather-api",
            "secret_name": "API_KEY",
            "secret_value": "sk-live-123",
        }))
        .unwrap();
        let debug = format!("{:?}", req);
        assert!(debug.contains("API_KEY"));
        assert!(!debug.contains("sk-live-123"));
    }
}
