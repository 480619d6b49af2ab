//! Batch execution endpoint.

use axum::{extract::State, response::IntoResponse, routing::post, Json, Router};
use prefab_core::{RunRequest, RunResponse};

use crate::error::{ApiError, ApiResult};
use crate::middleware::Caller;
use crate::orchestrator::Orchestrator;
use crate::state::AppState;

/// POST /v1/run - Execute a batch of prefab calls
///
/// Calls run in order. A failing call is reported in its own result slot;
/// the batch itself answers 200 unless the request is malformed.
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/v1/run",
    tag = "Run",
    request_body = RunRequest,
    responses(
        (status = 200, description = "Batch executed", body = RunResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 422, description = "Empty or oversized batch", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn run_batch(
    State(orchestrator): State<Orchestrator>,
    Caller(identity): Caller,
    Json(req): Json<RunRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = orchestrator.run(&identity, req).await?;
    Ok(Json(response))
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/", post(run_batch))
}
