//! Metric export endpoints.

use std::{collections::BTreeMap, time::Duration};

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use relay_metrics::{MetricSummary, HEALTH_WINDOW};
use serde::Deserialize;

use crate::AppState;

/// Query of the summary endpoint.
#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    /// Window in seconds; the health window when absent
    pub window_seconds: Option<u64>,
}

/// Latest value of every series as flat text.
pub async fn metrics_text(State(state): State<AppState>) -> Response {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], state.engine.export_text())
        .into_response()
}

/// Windowed summaries of every series.
pub async fn metrics_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Json<BTreeMap<String, MetricSummary>> {
    let window = query.window_seconds.map_or(HEALTH_WINDOW, Duration::from_secs);
    Json(state.engine.summaries(window))
}
