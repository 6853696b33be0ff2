//! HTTP request handlers.

pub mod health;
pub mod interactions;
pub mod metrics;
pub mod status;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
pub use health::health_check;
pub use interactions::handle_interaction;
pub use metrics::{metrics_summary, metrics_text};
use serde::Serialize;
pub use status::request_status;

/// Error response with code and message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Short machine-readable code
    pub code: String,
    /// Human-readable description
    pub message: String,
}

pub(crate) fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let body = ErrorResponse {
        error: ErrorDetail { code: code.to_string(), message: message.to_string() },
    };
    (status, Json(body)).into_response()
}
