//! Storage layer errors

use prefab_core::GatewayError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Write failed for {entity}: {reason}")]
    WriteFailed { entity: &'static str, reason: String },

    #[error("Read failed for {entity}: {reason}")]
    ReadFailed { entity: &'static str, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for GatewayError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { .. } => GatewayError::NotFound(e.to_string()),
            StorageError::Unavailable(reason) => GatewayError::Unavailable(reason),
            other => GatewayError::Storage(other.to_string()),
        }
    }
}
