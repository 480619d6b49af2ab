//! Middleware for the gateway router
//!
//! - `auth`: bearer-token authentication and the admin scope guard
//! - `audit`: one audit entry per authenticated request
//!
//! # Middleware Order
//!
//! ```ignore
//! Router::new()
//!     .route("/v1/admin/grants", post(handler))
//!     // Innermost: requires the identity injected below
//!     .layer(middleware::from_fn(admin_middleware))
//!     .layer(middleware::from_fn_with_state(audit_state, audit_middleware))
//!     .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
//! ```

mod audit;
mod auth;

pub use audit::{audit_middleware, AuditState, REQUEST_ID_HEADER};
pub use auth::{
    admin_middleware, auth_middleware, extract_identity, AuthMiddlewareError,
    AuthMiddlewareState, Caller,
};
