//! Health snapshot derived from the metrics window.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Minimum success rate, in percent, for a healthy report.
pub const HEALTHY_SUCCESS_RATE: f64 = 95.0;

/// Average response time, in milliseconds, at which the relay is degraded.
pub const DEGRADED_RESPONSE_MS: f64 = 10_000.0;

/// Overall health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Success rate above threshold and responses fast enough.
    Healthy,
    /// Anything else.
    Degraded,
}

impl HealthStatus {
    /// Applies the health thresholds.
    pub fn evaluate(success_rate_percent: f64, average_response_time_ms: f64) -> Self {
        if success_rate_percent > HEALTHY_SUCCESS_RATE
            && average_response_time_ms < DEGRADED_RESPONSE_MS
        {
            Self::Healthy
        } else {
            Self::Degraded
        }
    }

    /// Returns true for [`HealthStatus::Healthy`].
    pub fn is_healthy(self) -> bool {
        self == Self::Healthy
    }
}

/// Point-in-time health report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealth {
    /// Verdict.
    pub status: HealthStatus,
    /// Whole seconds since the collector was created.
    pub uptime_seconds: u64,
    /// Uptime as `1d 2h 3m`, `2h 3m` or `3m`.
    pub uptime_formatted: String,
    /// Completed over completed plus failed requests in the window, rounded
    /// to 2 places. 100 when nothing settled.
    pub success_rate_percent: f64,
    /// Mean response time in the window, rounded to 2 places.
    pub average_response_time_ms: f64,
    /// Requests picked up in the window.
    pub total_requests: u64,
    /// Requests failed in the window.
    pub failed_requests: u64,
    /// Current queue length.
    pub queue_size: usize,
    /// Workers currently holding a request.
    pub active_workers: usize,
    /// When the snapshot was taken.
    pub last_updated: DateTime<Utc>,
}

/// Formats an uptime with day, hour and minute granularity.
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
