//! Administrative REST API Routes
//!
//! Everything here sits behind `admin_middleware`: spec inventory, manual
//! grant management, vault key rotation and the audit trail.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use prefab_core::{AuditEntry, AuditQuery, DeploymentStatus, SpecKey, UnitSpec};
use prefab_storage::AuditLog;
use serde::{Deserialize, Serialize};

use crate::acl::Acl;
use crate::constants::MAX_AUDIT_LIMIT;
use crate::error::{ApiError, ApiResult};
use crate::middleware::Caller;
use crate::spec_cache::SpecCache;
use crate::state::AppState;
use crate::vault::Vault;

const DEFAULT_AUDIT_LIMIT: usize = 100;

// ============================================================================
// REQUEST/RESPONSE TYPES
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
pub struct ListPrefabsParams {
    /// PENDING, BUILDING, DEPLOYING, DEPLOYED or FAILED
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ListPrefabsResponse {
    pub prefabs: Vec<UnitSpec>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct GrantRequest {
    pub user_id: String,
    pub resource_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ReencryptResponse {
    pub rewritten: usize,
    pub key_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
pub struct AuditParams {
    pub user_id: Option<String>,
    pub action: Option<String>,
    /// Defaults to 100, capped at 1000.
    pub limit: Option<usize>,
}

impl AuditParams {
    fn into_query(self) -> AuditQuery {
        let limit = self
            .limit
            .unwrap_or(DEFAULT_AUDIT_LIMIT)
            .clamp(1, MAX_AUDIT_LIMIT);
        AuditQuery {
            user_id: self.user_id,
            action: self.action,
            limit: Some(limit),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AuditResponse {
    pub entries: Vec<AuditEntry>,
    pub total: usize,
}

// ============================================================================
// PREFABS
// ============================================================================

/// GET /v1/admin/prefabs - Full spec inventory
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/admin/prefabs",
    tag = "Admin",
    params(ListPrefabsParams),
    responses(
        (status = 200, description = "Specs with status, endpoint and usage", body = ListPrefabsResponse),
        (status = 403, description = "Caller is not an administrator", body = ApiError),
        (status = 422, description = "Unknown status filter", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn list_prefabs(
    State(specs): State<Arc<SpecCache>>,
    Query(params): Query<ListPrefabsParams>,
) -> ApiResult<impl IntoResponse> {
    let status = params
        .status
        .as_deref()
        .map(|s| {
            s.parse::<DeploymentStatus>()
                .map_err(|_| ApiError::validation_failed(format!("unknown status '{}'", s)))
        })
        .transpose()?;
    let prefabs = specs.list(status).await?;
    Ok(Json(ListPrefabsResponse {
        total: prefabs.len(),
        prefabs,
    }))
}

/// DELETE /v1/admin/prefabs/{unit_id}/{version} - Remove a spec
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/v1/admin/prefabs/{unit_id}/{version}",
    tag = "Admin",
    params(
        ("unit_id" = String, Path, description = "Unit identifier"),
        ("version" = String, Path, description = "Unit version"),
    ),
    responses(
        (status = 204, description = "Spec removed"),
        (status = 403, description = "Caller is not an administrator", body = ApiError),
        (status = 404, description = "No such spec", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn delete_prefab(
    State(specs): State<Arc<SpecCache>>,
    Caller(identity): Caller,
    Path((unit_id, version)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let key = SpecKey::new(unit_id, version);
    if !specs.delete(&key).await? {
        return Err(ApiError::not_found(format!("prefab {} not found", key)));
    }
    tracing::info!(spec = %key, admin = %identity.user_id, "Spec removed by administrator");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// GRANTS
// ============================================================================

/// POST /v1/admin/grants - Grant a user read access to a resource
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/admin/grants",
    tag = "Admin",
    request_body = GrantRequest,
    responses(
        (status = 204, description = "Grant recorded (idempotent)"),
        (status = 403, description = "Caller is not an administrator", body = ApiError),
        (status = 422, description = "Empty user or resource", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn create_grant(
    State(acl): State<Acl>,
    Json(req): Json<GrantRequest>,
) -> ApiResult<impl IntoResponse> {
    acl.grant_ownership(&req.user_id, &req.resource_uri).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /v1/admin/grants - Revoke a grant
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/v1/admin/grants",
    tag = "Admin",
    request_body = GrantRequest,
    responses(
        (status = 204, description = "Grant revoked"),
        (status = 403, description = "Caller is not an administrator", body = ApiError),
        (status = 404, description = "No such grant", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn revoke_grant(
    State(acl): State<Acl>,
    Json(req): Json<GrantRequest>,
) -> ApiResult<impl IntoResponse> {
    if !acl.revoke(&req.user_id, &req.resource_uri).await? {
        return Err(ApiError::not_found(format!(
            "no grant for {} on {}",
            req.user_id, req.resource_uri
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// VAULT
// ============================================================================

/// POST /v1/admin/vault/reencrypt - Move every secret to the current key
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/admin/vault/reencrypt",
    tag = "Admin",
    responses(
        (status = 200, description = "Secrets rewritten under the current key", body = ReencryptResponse),
        (status = 403, description = "Caller is not an administrator", body = ApiError),
        (status = 500, description = "A stored secret failed decryption", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn reencrypt_vault(
    State(vault): State<Arc<Vault>>,
    Caller(identity): Caller,
) -> ApiResult<impl IntoResponse> {
    let rewritten = vault.reencrypt_all().await?;
    tracing::info!(rewritten, admin = %identity.user_id, "Vault re-encryption finished");
    Ok(Json(ReencryptResponse {
        rewritten,
        key_id: vault.current_key_id().to_string(),
    }))
}

// ============================================================================
// AUDIT
// ============================================================================

/// GET /v1/admin/audit - Query the audit trail, newest first
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/admin/audit",
    tag = "Admin",
    params(AuditParams),
    responses(
        (status = 200, description = "Matching audit entries", body = AuditResponse),
        (status = 403, description = "Caller is not an administrator", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn query_audit(
    State(audit): State<Arc<dyn AuditLog>>,
    Query(params): Query<AuditParams>,
) -> ApiResult<impl IntoResponse> {
    let entries = audit.query(&params.into_query()).await?;
    Ok(Json(AuditResponse {
        total: entries.len(),
        entries,
    }))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/prefabs", get(list_prefabs))
        .route("/prefabs/:unit_id/:version", delete(delete_prefab))
        .route("/grants", post(create_grant).delete(revoke_grant))
        .route("/vault/reencrypt", post(reencrypt_vault))
        .route("/audit", get(query_audit))
}
