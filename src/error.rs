//! Error types for the gatehouse server
//!
//! Store, cache and HTTP-facing errors, built with thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Store Error ==
/// Failures talking to the shared key-value store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Network or connection failure, or the store is offline
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The operation did not complete within its deadline
    #[error("store operation timed out after {0} ms")]
    Timeout(u64),

    /// The store rejected the command
    #[error("store command failed: {0}")]
    Command(String),

    /// The store answered with a shape the caller did not expect
    #[error("unexpected store reply: {0}")]
    UnexpectedReply(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            StoreError::Unavailable(err.to_string())
        } else if err.kind() == redis::ErrorKind::TypeError {
            StoreError::UnexpectedReply(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// Convenience Result type for store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// == Cache Error ==
/// Errors surfaced by the cache layer. A miss is not an error.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The value could not be serialized for storage
    #[error("failed to encode cache entry for {key}: {reason}")]
    Encode { key: String, reason: String },

    /// The stored payload does not decode into the requested type
    #[error("failed to decode cache entry for {key}: {reason}")]
    Decode { key: String, reason: String },
}

// == Api Error ==
/// Unified error type for HTTP handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Internal error: {0}")]
    Internal(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Cache(CacheError::Store(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Cache(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for HTTP handlers.
pub type Result<T> = std::result::Result<T, ApiError>;
