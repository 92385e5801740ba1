//! Error types for the upload engine

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::upload::BlobId;

/// Engine-wide result type
pub type Result<T> = std::result::Result<T, BlobError>;

/// Errors returned synchronously by every engine operation.
///
/// `IntegrityMismatch` is terminal for the session that produced it. Every
/// other variant leaves the session record unchanged so the caller may retry.
/// A failed `put_chunk` may still leave bytes in the slot it was writing;
/// the next write to that index overwrites them, and reclamation deletes
/// them along with the rest of the session's chunks.
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Integrity mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Session already finalized as {0}")]
    AlreadyFinalized(BlobId),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl BlobError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidState(_) => StatusCode::CONFLICT,
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::IntegrityMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::ResourceExhausted(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::AlreadyFinalized(_) => StatusCode::CONFLICT,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::IntegrityMismatch { .. } => "INTEGRITY_MISMATCH",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            Self::AlreadyFinalized(_) => "ALREADY_FINALIZED",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }
}

impl From<sqlx::Error> for BlobError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for BlobError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("corrupt record: {}", e))
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for BlobError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error = match &self {
            Self::Storage(msg) => {
                tracing::error!("Storage error: {}", msg);
                "Storage error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(ErrorResponse {
            error,
            code: self.code(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            BlobError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            BlobError::InvalidArgument("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            BlobError::Unauthorized("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            BlobError::IntegrityMismatch {
                expected: "a".into(),
                actual: "b".into()
            }
            .code(),
            "INTEGRITY_MISMATCH"
        );
    }

    #[test]
    fn test_storage_error_from_json() {
        let err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: BlobError = err.into();
        assert!(matches!(err, BlobError::Storage(_)));
    }
}
