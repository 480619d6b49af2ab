//! Caller's file grants.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use prefab_core::AccessGrant;
use serde::{Deserialize, Serialize};

use crate::acl::Acl;
use crate::error::{ApiError, ApiResult};
use crate::middleware::Caller;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ListFilesResponse {
    pub files: Vec<AccessGrant>,
    pub total: usize,
}

/// GET /v1/files - Resources the caller may read
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/v1/files",
    tag = "Files",
    responses(
        (status = 200, description = "Caller's grants", body = ListFilesResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn list_files(
    State(acl): State<Acl>,
    Caller(identity): Caller,
) -> ApiResult<impl IntoResponse> {
    let files = acl.list(&identity.user_id).await?;
    Ok(Json(ListFilesResponse {
        total: files.len(),
        files,
    }))
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/", get(list_files))
}
