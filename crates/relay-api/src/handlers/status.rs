//! Request status lookup.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::error_response;
use crate::AppState;

/// Latest status of the request identified by token and requester.
pub async fn request_status(
    State(state): State<AppState>,
    Path((callback_token, requester_id)): Path<(String, String)>,
) -> Response {
    match state.engine.status_of(&callback_token, &requester_id).await {
        Some(snapshot) => Json(snapshot).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "not_found", "unknown request"),
    }
}
