//! Error Types for the Gateway HTTP Surface
//!
//! - [`ErrorCode`]: wire codes, one per failure class
//! - [`ApiError`]: the JSON error body returned by every endpoint
//! - conversions from core, storage, Postgres and serde errors
//!
//! Errors raised inside a single call of a batch never reach this type;
//! they degrade to a failed call result instead.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use prefab_core::{ErrorKind, GatewayError};
use prefab_storage::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum ErrorCode {
    /// Missing, malformed, expired or wrongly signed credentials
    #[serde(rename = "AUTHENTICATION_ERROR")]
    Unauthorized,

    /// Authenticated but lacking the required scope or grant
    #[serde(rename = "PERMISSION_DENIED")]
    Forbidden,

    /// Well-formed request that failed semantic validation
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationFailed,

    /// Request body could not be decoded
    #[serde(rename = "INVALID_INPUT")]
    InvalidInput,

    #[serde(rename = "NOT_FOUND")]
    NotFound,

    /// Caller-fixable configuration gap, e.g. a required secret is absent
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    #[serde(rename = "UNAVAILABLE")]
    ServiceUnavailable,

    /// Stored data failed verification
    #[serde(rename = "INTEGRITY_ERROR")]
    IntegrityError,

    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,

    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::ValidationFailed => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::InvalidInput | ErrorCode::ConfigurationError => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::IntegrityError | ErrorCode::DatabaseError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "Authentication required",
            ErrorCode::Forbidden => "Access forbidden",
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::ConfigurationError => "Configuration incomplete",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::IntegrityError => "Stored data failed integrity verification",
            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::InternalError => "Internal server error",
        }
    }
}

impl From<ErrorKind> for ErrorCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Authentication => ErrorCode::Unauthorized,
            ErrorKind::Authorization => ErrorCode::Forbidden,
            ErrorKind::Validation => ErrorCode::ValidationFailed,
            ErrorKind::NotFound => ErrorCode::NotFound,
            ErrorKind::Configuration => ErrorCode::ConfigurationError,
            ErrorKind::Unavailable => ErrorCode::ServiceUnavailable,
            ErrorKind::Integrity => ErrorCode::IntegrityError,
            ErrorKind::Internal => ErrorCode::InternalError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiError {
    pub code: ErrorCode,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let code = ErrorCode::from(err.kind());
        match code {
            ErrorCode::InternalError | ErrorCode::IntegrityError => {
                // Internal detail stays in the logs.
                tracing::error!(error = %err, "Request failed");
                ApiError::from_code(code)
            }
            _ => ApiError::new(code, err.detail()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        GatewayError::from(err).into()
    }
}

impl From<tokio_postgres::Error> for ApiError {
    fn from(err: tokio_postgres::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        ApiError::database_error("Database operation failed")
    }
}

impl From<deadpool_postgres::PoolError> for ApiError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        tracing::error!("Connection pool error: {:?}", err);

        match err {
            deadpool_postgres::PoolError::Timeout(_) | deadpool_postgres::PoolError::Closed => {
                ApiError::service_unavailable("Database connection pool unavailable")
            }
            _ => ApiError::database_error("Failed to acquire database connection"),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
