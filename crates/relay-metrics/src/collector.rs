//! Metric registry, recording and windowed queries.

use std::{
    collections::{BTreeMap, VecDeque},
    fmt::Write as _,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::{Duration, Instant, SystemTime},
};

use relay_core::{time::unix_millis, Clock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    health::{format_uptime, HealthStatus, SystemHealth},
    names, MetricsConfig, HEALTH_WINDOW,
};

/// Whether a series accumulates or samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Each point is an increment; summaries are read through `sum`.
    Counter,
    /// Each point is an observation; the latest one is the current value.
    Gauge,
}

/// One observation. Never modified after it is appended.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    /// When the observation was taken.
    pub timestamp: SystemTime,
    /// Observed value.
    pub value: f64,
    /// Per-point labels.
    pub labels: BTreeMap<String, String>,
}

/// Aggregate over the points of one series inside a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    /// Series name.
    pub name: String,
    /// Series description.
    pub description: String,
    /// Window the summary covers.
    pub window_seconds: u64,
    /// Number of points in the window.
    pub count: usize,
    /// Sum of values.
    pub sum: f64,
    /// Mean value, zero for an empty window.
    pub avg: f64,
    /// Smallest value, zero for an empty window.
    pub min: f64,
    /// Largest value, zero for an empty window.
    pub max: f64,
}

#[derive(Debug)]
struct Metric {
    kind: MetricKind,
    description: &'static str,
    static_labels: BTreeMap<String, String>,
    points: VecDeque<MetricPoint>,
}

impl Metric {
    fn new(kind: MetricKind, description: &'static str, capacity: usize) -> Self {
        Self {
            kind,
            description,
            static_labels: BTreeMap::new(),
            points: VecDeque::with_capacity(capacity),
        }
    }

    fn summarize(&self, name: &str, window: Duration, now: SystemTime) -> MetricSummary {
        let cutoff = now.checked_sub(window);
        let values: Vec<f64> = self
            .points
            .iter()
            .filter(|p| cutoff.map_or(true, |c| p.timestamp >= c))
            .map(|p| p.value)
            .collect();

        let (sum, min, max) = if values.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            values.iter().fold((0.0, f64::INFINITY, f64::NEG_INFINITY), |(s, lo, hi), v| {
                (s + v, lo.min(*v), hi.max(*v))
            })
        };
        let count = values.len();

        MetricSummary {
            name: name.to_string(),
            description: self.description.to_string(),
            window_seconds: window.as_secs(),
            count,
            sum,
            avg: if count == 0 { 0.0 } else { sum / count as f64 },
            min,
            max,
        }
    }

    fn latest_value(&self) -> f64 {
        self.points.back().map_or(0.0, |p| p.value)
    }
}

/// Fixed registry of time-series metrics.
///
/// Cheap to share behind an `Arc`; all methods take `&self`. A single coarse
/// lock guards the registry since every operation is short and in-memory.
#[derive(Debug)]
pub struct MetricsCollector {
    registry: RwLock<BTreeMap<&'static str, Metric>>,
    capacity: usize,
    clock: Arc<dyn Clock>,
    started_at: Instant,
}

impl MetricsCollector {
    /// Builds a collector with every series in [`names`] registered.
    pub fn new(config: MetricsConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = config.buffer_capacity.max(1);
        let mut registry = BTreeMap::new();

        for (name, kind, description) in [
            (names::REQUESTS_TOTAL, MetricKind::Counter, "Requests picked up by a worker"),
            (names::REQUESTS_SUCCESS, MetricKind::Counter, "Requests delivered successfully"),
            (names::REQUESTS_FAILED, MetricKind::Counter, "Requests that exhausted their retries"),
            (names::RESPONSE_TIME_MS, MetricKind::Gauge, "Submission to delivery latency in ms"),
            (names::QUEUE_SIZE, MetricKind::Gauge, "Requests waiting in the queue"),
            (names::ACTIVE_WORKERS, MetricKind::Gauge, "Workers currently processing a request"),
            (names::RETRIES_TOTAL, MetricKind::Counter, "Request-level retries scheduled"),
        ] {
            registry.insert(name, Metric::new(kind, description, capacity));
        }

        let started_at = clock.now();
        debug!(series = registry.len(), capacity, "metrics registry initialized");

        Self { registry: RwLock::new(registry), capacity, clock, started_at }
    }

    /// Maximum number of points kept per series.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Kind of a registered series.
    pub fn kind(&self, name: &str) -> Option<MetricKind> {
        self.read().get(name).map(|m| m.kind)
    }

    /// Appends a point. Unknown names are ignored with a warning.
    pub fn record(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let point = MetricPoint {
            timestamp: self.clock.now_system(),
            value,
            labels: labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
        };

        let mut registry = self.write();
        let Some(metric) = registry.get_mut(name) else {
            warn!(metric = name, "ignoring point for unregistered metric");
            return;
        };

        if metric.points.len() >= self.capacity {
            metric.points.pop_front();
        }
        metric.points.push_back(point);
    }

    /// Adds a counter point of value 1.
    pub fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        self.record(name, 1.0, labels);
    }

    /// Records the milliseconds elapsed since `start`.
    pub fn record_duration(&self, name: &str, start: Instant, labels: &[(&str, &str)]) {
        let elapsed = self.clock.elapsed_since(start);
        self.record(name, elapsed.as_secs_f64() * 1000.0, labels);
    }

    /// Records a gauge value given as a count.
    pub fn set_gauge(&self, name: &str, value: usize) {
        self.record(name, value as f64, &[]);
    }

    /// Summary of one series over the trailing `window`, `None` if unknown.
    pub fn summary(&self, name: &str, window: Duration) -> Option<MetricSummary> {
        let now = self.clock.now_system();
        self.read().get(name).map(|m| m.summarize(name, window, now))
    }

    /// Summaries of every registered series, keyed by name.
    pub fn summaries(&self, window: Duration) -> BTreeMap<String, MetricSummary> {
        let now = self.clock.now_system();
        self.read()
            .iter()
            .map(|(name, m)| ((*name).to_string(), m.summarize(name, window, now)))
            .collect()
    }

    /// Health snapshot over the last five minutes.
    pub fn health(&self) -> SystemHealth {
        let now = self.clock.now_system();
        let registry = self.read();
        let window_sum = |name: &str| {
            registry.get(name).map_or(0.0, |m| m.summarize(name, HEALTH_WINDOW, now).sum)
        };
        let latest = |name: &str| registry.get(name).map_or(0.0, Metric::latest_value);

        let total = window_sum(names::REQUESTS_TOTAL);
        let success = window_sum(names::REQUESTS_SUCCESS);
        let failed = window_sum(names::REQUESTS_FAILED);
        let avg_response = registry
            .get(names::RESPONSE_TIME_MS)
            .map_or(0.0, |m| m.summarize(names::RESPONSE_TIME_MS, HEALTH_WINDOW, now).avg);
        let queue_size = latest(names::QUEUE_SIZE);
        let active_workers = latest(names::ACTIVE_WORKERS);
        drop(registry);

        // Rate over settled requests only; a retry in flight is neither.
        let settled = success + failed;
        let success_rate = if settled > 0.0 { success / settled * 100.0 } else { 100.0 };
        let status = HealthStatus::evaluate(success_rate, avg_response);
        let uptime = self.clock.elapsed_since(self.started_at);

        SystemHealth {
            status,
            uptime_seconds: uptime.as_secs(),
            uptime_formatted: format_uptime(uptime),
            success_rate_percent: round2(success_rate),
            average_response_time_ms: round2(avg_response),
            total_requests: total as u64,
            failed_requests: failed as u64,
            queue_size: queue_size as usize,
            active_workers: active_workers as usize,
            last_updated: now.into(),
        }
    }

    /// Flat text export, one line per series that has points.
    ///
    /// Each line is `name{k="v",...} value timestamp_ms` built from the most
    /// recent point; static and point labels are merged with point labels
    /// taking precedence.
    pub fn export_text(&self) -> String {
        let registry = self.read();
        let mut out = String::new();

        for (name, metric) in registry.iter() {
            let Some(point) = metric.points.back() else { continue };

            let mut labels = metric.static_labels.clone();
            labels.extend(point.labels.iter().map(|(k, v)| (k.clone(), v.clone())));

            out.push_str(name);
            if !labels.is_empty() {
                let rendered: Vec<String> = labels
                    .iter()
                    .map(|(k, v)| format!("{k}=\"{}\"", escape_label(v)))
                    .collect();
                let _ = write!(out, "{{{}}}", rendered.join(","));
            }
            let _ = writeln!(out, " {} {}", point.value, unix_millis(point.timestamp));
        }

        out
    }

    /// Removes points older than `max_age` from every series.
    ///
    /// Returns the number of points removed. Running it twice with the same
    /// clock reading removes nothing the second time.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let Some(cutoff) = self.clock.now_system().checked_sub(max_age) else {
            return 0;
        };

        let mut removed = 0;
        for metric in self.write().values_mut() {
            let before = metric.points.len();
            metric.points.retain(|p| p.timestamp >= cutoff);
            removed += before - metric.points.len();
        }

        if removed > 0 {
            info!(removed, max_age_secs = max_age.as_secs(), "evicted stale metric points");
        }
        removed
    }

    /// Number of points currently held by a series.
    pub fn point_count(&self, name: &str) -> usize {
        self.read().get(name).map_or(0, |m| m.points.len())
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<&'static str, Metric>> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<&'static str, Metric>> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn escape_label(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}
