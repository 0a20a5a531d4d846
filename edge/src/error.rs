use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// The error taxonomy the core surfaces, per the relay's error handling design:
/// validation and not-found errors are returned to the caller; storage
/// failures are logged and mapped to 500 without leaking internals.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("payload of {actual} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { actual: usize, max: usize },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            RelayError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_argument"),
            RelayError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            RelayError::PayloadTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
            RelayError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        };

        if matches!(self, RelayError::Storage(_)) {
            tracing::error!(error = %self, "storage error serving request");
        }

        (
            status,
            Json(serde_json::json!({
                "error": code,
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}
