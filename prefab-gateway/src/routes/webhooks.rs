//! Deployment Webhook Routes
//!
//! - `POST /webhooks/factory`: pipeline deliveries, authenticated by an
//!   HMAC-SHA256 of the raw body instead of a bearer token
//! - `GET /webhooks/events/{event_id}`: processing state, bearer auth
//!
//! The receiver takes the body as raw bytes so the signature is checked
//! over exactly what was sent.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prefab_core::WebhookEvent;

use crate::constants::WEBHOOK_SIGNATURE_HEADER;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::webhook::{WebhookAck, WebhookProcessor};

/// POST /webhooks/factory - Receive a deployment lifecycle event
///
/// Redelivery of an already processed event answers with the recorded
/// outcome and changes nothing.
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/webhooks/factory",
    tag = "Webhooks",
    request_body(content = prefab_core::WebhookPayload, description = "Deployment event"),
    params(
        ("x-webhook-signature" = Option<String>, Header, description = "Hex HMAC-SHA256 of the raw body"),
    ),
    responses(
        (status = 200, description = "Event processed or already processed", body = WebhookAck),
        (status = 401, description = "Missing or invalid signature", body = ApiError),
        (status = 422, description = "Malformed payload", body = ApiError),
        (status = 503, description = "Processing failed; the event may be redelivered", body = ApiError),
    )
))]
pub async fn receive_factory_event(
    State(webhooks): State<Arc<WebhookProcessor>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let ack = webhooks.ingest(&body, signature).await?;
    Ok(Json(ack))
}

/// GET /webhooks/events/{event_id} - Processing state of one event
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/webhooks/events/{event_id}",
    tag = "Webhooks",
    params(("event_id" = String, Path, description = "Pipeline event identifier")),
    responses(
        (status = 200, description = "Ledger row", body = WebhookEvent),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Event never received", body = ApiError),
    ),
    security(("bearer_auth" = []))
))]
pub async fn get_event(
    State(webhooks): State<Arc<WebhookProcessor>>,
    Path(event_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let event = webhooks
        .get_event(&event_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("event {} not found", event_id)))?;
    Ok(Json(event))
}

/// Public receiver; mounted outside the bearer-auth layer.
pub fn create_receiver_router() -> Router<AppState> {
    Router::new().route("/factory", post(receive_factory_event))
}

/// Event queries; mounted behind the bearer-auth layer.
pub fn create_events_router() -> Router<AppState> {
    Router::new().route("/:event_id", get(get_event))
}
