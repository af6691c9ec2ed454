//! Unified error handling for the relay.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use duet_engine::RemoteError;
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            AppError::Remote(RemoteError::Rejected(reason)) => {
                tracing::warn!(reason = %reason, "Write rejected");
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "Record rejected".to_string(),
                    Some(reason.clone()),
                )
            }
            AppError::Remote(RemoteError::Unavailable(reason)) => {
                tracing::error!(reason = %reason, "Store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Store unavailable".to_string(),
                    None,
                )
            }
            AppError::Remote(RemoteError::Timeout) => (
                StatusCode::GATEWAY_TIMEOUT,
                "Store timed out".to_string(),
                None,
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
