//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("name conflict: {0}")]
    NameConflict(String),

    #[error("invalid write token: {0}")]
    InvalidToken(String),

    #[error("resource locked: {0}")]
    ResourceLocked(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed filter: {0}")]
    MalformedFilter(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("storage error: {0}")]
    Storage(#[from] sextant_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] sextant_metadata::MetadataError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sextant_core::Error> for ApiError {
    fn from(err: sextant_core::Error) -> Self {
        use sextant_core::Error;
        match err {
            Error::SchemaMismatch(msg) => Self::SchemaMismatch(msg),
            Error::MalformedFilter(msg) => Self::MalformedFilter(msg),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl ApiError {
    /// Map a catalog error raised by a guarded lifecycle write.
    ///
    /// Unique violations become `NameConflict`, state guards `ResourceLocked`
    /// and token guards `InvalidToken`.
    pub fn from_lifecycle(err: sextant_metadata::MetadataError) -> Self {
        use sextant_metadata::MetadataError;
        match err {
            MetadataError::AlreadyExists(msg) => Self::NameConflict(msg),
            MetadataError::InvalidStateTransition { from, .. } => {
                Self::ResourceLocked(format!("sequence is {from}"))
            }
            MetadataError::Constraint(msg) => Self::InvalidToken(msg),
            MetadataError::NotFound(msg) => Self::NotFound(msg),
            other => Self::Metadata(other),
        }
    }

    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NameConflict(_) => "name_conflict",
            Self::InvalidToken(_) => "invalid_token",
            Self::ResourceLocked(_) => "resource_locked",
            Self::SchemaMismatch(_) => "schema_mismatch",
            Self::NotFound(_) => "not_found",
            Self::MalformedFilter(_) => "malformed_filter",
            Self::BadRequest(_) => "bad_request",
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NameConflict(_) | Self::ResourceLocked(_) => StatusCode::CONFLICT,
            Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::SchemaMismatch(_) | Self::MalformedFilter(_) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(_) | Self::Metadata(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = ErrorResponse {
            code: self.code().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
