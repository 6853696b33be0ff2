//! Time-windowed metrics for the callback relay.
//!
//! A fixed registry of named series is created when the collector is built.
//! Each series keeps a capacity-bounded buffer of timestamped points; the
//! collector answers windowed summaries, a health snapshot and a flat text
//! export. Nothing here talks to an external telemetry system.
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//!
//! use relay_core::RealClock;
//! use relay_metrics::{names, MetricsCollector, MetricsConfig};
//!
//! let metrics = MetricsCollector::new(MetricsConfig::default(), Arc::new(RealClock::new()));
//! metrics.increment(names::REQUESTS_TOTAL, &[]);
//!
//! let summary = metrics.summary(names::REQUESTS_TOTAL, Duration::from_secs(60)).unwrap();
//! assert_eq!(summary.count, 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod collector;
pub mod health;

use std::time::Duration;

pub use collector::{MetricKind, MetricPoint, MetricSummary, MetricsCollector};
pub use health::{format_uptime, HealthStatus, SystemHealth};

/// Names of the series registered by every collector.
pub mod names {
    /// Requests picked up by a worker, one point per attempt.
    pub const REQUESTS_TOTAL: &str = "relay_requests_total";
    /// Requests that reached COMPLETED.
    pub const REQUESTS_SUCCESS: &str = "relay_requests_success";
    /// Requests that reached FAILED.
    pub const REQUESTS_FAILED: &str = "relay_requests_failed";
    /// Milliseconds from submission to successful delivery.
    pub const RESPONSE_TIME_MS: &str = "relay_response_time_ms";
    /// Queue length observed at submission and dequeue.
    pub const QUEUE_SIZE: &str = "relay_queue_size";
    /// Workers currently holding a request.
    pub const ACTIVE_WORKERS: &str = "relay_active_workers";
    /// Request-level retries scheduled.
    pub const RETRIES_TOTAL: &str = "relay_retries_total";
}

/// Default number of points kept per series.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

/// Window used by the health snapshot.
pub const HEALTH_WINDOW: Duration = Duration::from_secs(300);

/// Collector settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Maximum points retained per series; the oldest point is dropped first.
    pub buffer_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { buffer_capacity: DEFAULT_BUFFER_CAPACITY }
    }
}
