use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use matte_core::error::CoreError;
use serde_json::json;

use crate::gateway::GatewayError;

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] to produce consistent `{error, code}` JSON
/// bodies. Internal failures are logged and their messages sanitized.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `matte_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A submission or lookup failure from the gateway.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The multipart body could not be read.
    #[error(transparent)]
    Multipart(#[from] MultipartError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

fn internal(message: &str) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %message, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone())
                }
                CoreError::InvalidTransition { .. } => internal(&core.to_string()),
                CoreError::Internal(msg) => internal(msg),
            },

            AppError::Gateway(gateway) => match gateway {
                GatewayError::InvalidInput(msg) => {
                    (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone())
                }
                GatewayError::QueueUnavailable(msg) => {
                    tracing::warn!(error = %msg, "Submission rejected, queue unavailable");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "QUEUE_UNAVAILABLE",
                        "The job queue is temporarily unavailable".to_string(),
                    )
                }
                GatewayError::NotFound(id) => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("Job not found: {id}"),
                ),
            },

            AppError::Multipart(err) => {
                let status = err.status();
                let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
                    "PAYLOAD_TOO_LARGE"
                } else {
                    "INVALID_INPUT"
                };
                (status, code, err.body_text())
            }

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone()),
            AppError::InternalError(msg) => internal(msg),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
