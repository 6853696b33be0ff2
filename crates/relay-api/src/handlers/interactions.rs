//! Inbound interaction endpoint.
//!
//! Answers within the platform's acknowledgment deadline: pings get a pong,
//! chat commands are queued and acknowledged as deferred, and the real
//! answer is delivered later through the callback.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use relay_delivery::{client::EPHEMERAL_FLAG, InteractionKind, RawInteraction, SubmitError};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use super::error_response;
use crate::{
    crypto::{SIGNATURE_HEADER, TIMESTAMP_HEADER},
    AppState,
};

/// Interaction response type: pong.
pub const RESPONSE_PONG: u64 = 1;

/// Interaction response type: immediate message.
pub const RESPONSE_MESSAGE: u64 = 4;

/// Interaction response type: deferred acknowledgment.
pub const RESPONSE_DEFERRED: u64 = 5;

/// Usage hint returned when a chat command has no prompt.
pub const USAGE_HINT: &str = "Please include a message. Example: /chat prompt:Your question";

/// Reply when the queue is full.
pub const BUSY_MESSAGE: &str = "The assistant is busy right now. Please try again in a moment.";

/// Handles a signed interaction.
///
/// # Responses
///
/// - 401: signature headers missing or invalid
/// - 400: unparseable or incomplete body, or an unsupported type
/// - 503: the relay is shutting down
/// - 200 with `{"type":1}` for pings, `{"type":5}` for queued commands,
///   `{"type":4}` for a usage hint or a busy notice
#[instrument(name = "interaction", skip_all, fields(body_len = body.len()))]
pub async fn handle_interaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let timestamp = headers.get(TIMESTAMP_HEADER).and_then(|v| v.to_str().ok());
    let (Some(signature), Some(timestamp)) = (signature, timestamp) else {
        warn!("interaction without signature headers");
        return error_response(
            StatusCode::UNAUTHORIZED,
            "missing_signature",
            "missing signature headers",
        );
    };
    if !state.verifier.verify(signature, timestamp, &body) {
        warn!("interaction with invalid signature");
        return error_response(
            StatusCode::UNAUTHORIZED,
            "invalid_signature",
            "invalid request signature",
        );
    }

    let Ok(payload) = serde_json::from_slice::<Value>(&body) else {
        return error_response(StatusCode::BAD_REQUEST, "malformed", "body is not JSON");
    };
    let interaction = match RawInteraction::from_value(&payload) {
        Ok(interaction) => interaction,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "malformed", &e.to_string()),
    };

    match interaction.kind() {
        InteractionKind::Ping => {
            debug!("ping received");
            Json(json!({ "type": RESPONSE_PONG })).into_response()
        },
        InteractionKind::Command => {
            if interaction.prompt().is_none() {
                let command = interaction.command_name().unwrap_or_default();
                debug!(command, "command without prompt");
                return message(USAGE_HINT, false);
            }
            submit(&state, &payload).await
        },
        InteractionKind::Other(code) => {
            warn!(interaction_type = code, "unsupported interaction type");
            error_response(StatusCode::BAD_REQUEST, "unsupported", "unsupported interaction type")
        },
    }
}

async fn submit(state: &AppState, payload: &Value) -> Response {
    match state.engine.submit(payload).await {
        Ok(id) => {
            info!(request_id = %id, "interaction queued, sending deferred acknowledgment");
            Json(json!({ "type": RESPONSE_DEFERRED })).into_response()
        },
        Err(SubmitError::QueueFull { capacity }) => {
            warn!(capacity, "queue full, answering busy");
            message(BUSY_MESSAGE, true)
        },
        Err(e @ SubmitError::Malformed { .. }) => {
            error_response(StatusCode::BAD_REQUEST, "malformed", &e.to_string())
        },
        Err(SubmitError::ShuttingDown) => {
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "shutting_down",
                "relay is shutting down",
            )
        },
    }
}

fn message(content: &str, ephemeral: bool) -> Response {
    let mut data = json!({ "content": content });
    if ephemeral {
        data["flags"] = json!(EPHEMERAL_FLAG);
    }
    Json(json!({ "type": RESPONSE_MESSAGE, "data": data })).into_response()
}
