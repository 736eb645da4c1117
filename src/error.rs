use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Storage-layer failure (connection, statement, transaction).
#[derive(Debug, Error)]
#[error("storage failure: {0}")]
pub struct StorageError(#[from] rusqlite::Error);

/// Error taxonomy surfaced at the HTTP boundary.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed caller input; the request should not be retried as-is.
    #[error("{0}")]
    Validation(String),

    /// A lookup target that must exist is absent.
    #[error("{0}")]
    NotFound(String),

    /// Storage failure; safe for the caller to retry the whole request.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ServiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ServiceError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ServiceError::NotFound(msg.into())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServiceError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ServiceError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ServiceError::Storage(err) => {
                // Storage detail stays in the logs, not in the response body.
                error!("storage error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal storage error".to_string(),
                )
            }
        };
        (
            status,
            Json(json!({ "success": false, "message": message })),
        )
            .into_response()
    }
}
