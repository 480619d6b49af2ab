//! Axum Middleware for Authentication
//!
//! - Verifies the `Authorization: Bearer` token
//! - Injects the caller [`Identity`] into request extensions
//! - Returns 401 for unauthenticated requests and 403 when an admin-only
//!   route is reached without the admin scope

use crate::auth::{authenticate_bearer, AuthConfig};
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use prefab_core::{Identity, ADMIN_SCOPE};
use std::sync::Arc;

// ============================================================================
// MIDDLEWARE STATE
// ============================================================================

/// Shared state for authentication middleware.
#[derive(Debug, Clone)]
pub struct AuthMiddlewareState {
    pub auth_config: Arc<AuthConfig>,
}

impl AuthMiddlewareState {
    pub fn new(auth_config: AuthConfig) -> Self {
        Self {
            auth_config: Arc::new(auth_config),
        }
    }
}

// ============================================================================
// MIDDLEWARE FUNCTIONS
// ============================================================================

/// Authenticate the request and attach the caller identity.
///
/// ```ignore
/// use axum::{Router, middleware};
/// use prefab_gateway::middleware::{auth_middleware, AuthMiddlewareState};
/// use prefab_gateway::AuthConfig;
///
/// let auth_state = AuthMiddlewareState::new(AuthConfig::from_env());
///
/// let app = Router::new()
///     .route("/v1/secrets", axum::routing::get(|| async { "OK" }))
///     .layer(middleware::from_fn_with_state(auth_state, auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<AuthMiddlewareState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let identity = authenticate_bearer(&state.auth_config, auth_header).map_err(|e| {
        tracing::debug!(reason = %e.message, "Rejected bearer token");
        AuthMiddlewareError(e)
    })?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Reject callers without the admin scope. Must run after [`auth_middleware`].
pub async fn admin_middleware(
    request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    let identity = extract_identity(&request).map_err(AuthMiddlewareError)?;
    if !identity.is_admin() {
        return Err(AuthMiddlewareError(ApiError::forbidden(format!(
            "scope '{}' required",
            ADMIN_SCOPE
        ))));
    }
    Ok(next.run(request).await)
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Error wrapper for middleware that implements IntoResponse.
#[derive(Debug)]
pub struct AuthMiddlewareError(pub ApiError);

impl IntoResponse for AuthMiddlewareError {
    fn into_response(self) -> Response {
        self.0.into_response()
    }
}

// ============================================================================
// TYPED EXTRACTOR
// ============================================================================

/// Typed extractor for the authenticated caller.
///
/// ```rust,no_run
/// use axum::Json;
/// use prefab_gateway::middleware::Caller;
///
/// async fn whoami(Caller(identity): Caller) -> Json<String> {
///     Json(identity.user_id)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Caller(pub Identity);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AuthMiddlewareError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(Caller)
            .ok_or_else(|| {
                AuthMiddlewareError(ApiError::internal_error(
                    "Identity not found in request extensions. \
                     Ensure auth_middleware is applied to this route.",
                ))
            })
    }
}

impl std::ops::Deref for Caller {
    type Target = Identity;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Identity attached by [`auth_middleware`].
pub fn extract_identity(request: &Request) -> ApiResult<&Identity> {
    request
        .extensions()
        .get::<Identity>()
        .ok_or_else(|| ApiError::unauthorized("Identity missing from request"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{generate_jwt_token, Claims, FixedClock};
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    const SECRET: &str = "middleware-test-secret-with-plenty-of-length";

    fn config() -> AuthConfig {
        AuthConfig::default()
            .with_secret(SECRET)
            .with_clock(Arc::new(FixedClock(1704067200)))
    }

    fn app() -> Router {
        let state = AuthMiddlewareState::new(config());
        let admin = Router::new()
            .route("/admin", get(|| async { "admin" }))
            .layer(middleware::from_fn(admin_middleware));
        Router::new()
            .route(
                "/whoami",
                get(|Caller(identity): Caller| async move { identity.user_id }),
            )
            .merge(admin)
            .layer(middleware::from_fn_with_state(state, auth_middleware))
    }

    fn bearer(scopes: &[&str]) -> String {
        let cfg = config();
        let claims = Claims::new("user-7", &cfg).with_scopes(scopes.iter().copied());
        format!("Bearer {}", generate_jwt_token(&cfg, &claims).unwrap())
    }

    async fn send(path: &str, auth: Option<String>) -> (StatusCode, Vec<u8>) {
        let mut builder = HttpRequest::builder().uri(path);
        if let Some(value) = auth {
            builder = builder.header(AUTHORIZATION, value);
        }
        let response = app()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_identity_injected() {
        let (status, body) = send("/whoami", Some(bearer(&[]))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"user-7");
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let (status, _) = send("/whoami", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_route_requires_admin_scope() {
        let (status, _) = send("/admin", Some(bearer(&["spec:write"]))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send("/admin", Some(bearer(&[ADMIN_SCOPE]))).await;
        assert_eq!(status, StatusCode::OK);
    }
}
