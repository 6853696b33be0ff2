//! Health endpoint.

use axum::{extract::State, Json};
use relay_metrics::SystemHealth;
use tracing::debug;

use crate::AppState;

/// Returns the relay's [`SystemHealth`].
///
/// Always 200 while the process serves requests; the verdict lives in the
/// `status` field of the body.
pub async fn health_check(State(state): State<AppState>) -> Json<SystemHealth> {
    let health = state.engine.health();
    debug!(status = ?health.status, queue_size = health.queue_size, "health check");
    Json(health)
}
