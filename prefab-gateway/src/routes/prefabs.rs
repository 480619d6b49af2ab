//! Prefab spec REST API Routes

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prefab_core::{SpecDocument, SpecKey, SpecView, UnitSpec};
use serde::{Deserialize, Serialize};

use crate::constants::SPEC_WRITE_SCOPE;
use crate::error::{ApiError, ApiResult};
use crate::middleware::Caller;
use crate::spec_cache::{PublishMeta, SpecCache};
use crate::state::AppState;

/// Body of a spec publish: the interface document plus optional provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PublishSpecRequest {
    #[serde(flatten)]
    pub document: SpecDocument,
    #[serde(default)]
    pub artifact_url: Option<String>,
    #[serde(default)]
    pub source_repo: Option<String>,
}

/// GET /v1/prefabs/{unit_id}/{version}/spec - Read a published interface
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/prefabs/{unit_id}/{version}/spec",
    tag = "Prefabs",
    params(
        ("unit_id" = String, Path, description = "Unit identifier"),
        ("version" = String, Path, description = "Unit version"),
    ),
    responses(
        (status = 200, description = "Interface description", body = SpecView),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "No spec published for this version", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn get_spec(
    State(specs): State<Arc<SpecCache>>,
    Path((unit_id, version)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let key = SpecKey::new(unit_id, version);
    let spec = specs
        .get(&key)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("prefab {} is not published", key)))?;
    Ok(Json(SpecView::from(spec)))
}

/// POST /v1/prefabs/{unit_id}/{version}/spec - Publish or replace an interface
///
/// Requires the `spec:write` scope.
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/prefabs/{unit_id}/{version}/spec",
    tag = "Prefabs",
    params(
        ("unit_id" = String, Path, description = "Unit identifier"),
        ("version" = String, Path, description = "Unit version"),
    ),
    request_body = PublishSpecRequest,
    responses(
        (status = 201, description = "Spec published", body = UnitSpec),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 403, description = "Caller lacks spec:write", body = ApiError),
        (status = 422, description = "Malformed spec document", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn publish_spec(
    State(specs): State<Arc<SpecCache>>,
    Caller(identity): Caller,
    Path((unit_id, version)): Path<(String, String)>,
    Json(req): Json<PublishSpecRequest>,
) -> ApiResult<impl IntoResponse> {
    identity.require_scope(SPEC_WRITE_SCOPE)?;
    if unit_id.trim().is_empty() || version.trim().is_empty() {
        return Err(ApiError::validation_failed("unit_id and version are required"));
    }
    if req.document.functions.is_empty() {
        return Err(ApiError::validation_failed(
            "spec must declare at least one function",
        ));
    }

    let key = SpecKey::new(unit_id, version);
    let meta = PublishMeta {
        artifact_url: req.artifact_url,
        source_repo: req.source_repo,
    };
    let spec = specs.publish(&key, req.document, meta).await?;
    tracing::debug!(spec = %key, publisher = %identity.user_id, "Spec published via API");
    Ok((StatusCode::CREATED, Json(spec)))
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/:unit_id/:version/spec", get(get_spec).post(publish_spec))
}
