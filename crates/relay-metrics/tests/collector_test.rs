//! Integration tests for the metrics collector.
//!
//! Exercises concurrent recording and the JSON shape served by the health
//! and summary endpoints.

#![allow(clippy::unwrap_used)]

use std::{
    sync::Arc,
    thread,
    time::{Duration, SystemTime},
};

use relay_core::TestClock;
use relay_metrics::{names, HealthStatus, MetricsCollector, MetricsConfig};

fn collector() -> (Arc<MetricsCollector>, TestClock) {
    let clock = TestClock::with_start_time(SystemTime::UNIX_EPOCH + Duration::from_secs(10_000));
    let metrics = MetricsCollector::new(MetricsConfig::default(), Arc::new(clock.clone()));
    (Arc::new(metrics), clock)
}

#[test]
fn concurrent_increments_are_all_counted() {
    let (metrics, _) = collector();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let metrics = Arc::clone(&metrics);
            thread::spawn(move || {
                for _ in 0..50 {
                    metrics.increment(names::REQUESTS_TOTAL, &[]);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let summary = metrics.summary(names::REQUESTS_TOTAL, Duration::from_secs(60)).unwrap();
    assert_eq!(summary.count, 400);
    assert_eq!(summary.sum, 400.0);
}

#[test]
fn capacity_bounds_points_regardless_of_eviction() {
    let (metrics, _) = collector();
    for _ in 0..(metrics.capacity() + 250) {
        metrics.increment(names::RETRIES_TOTAL, &[]);
    }
    assert_eq!(metrics.point_count(names::RETRIES_TOTAL), metrics.capacity());
    assert_eq!(metrics.evict_older_than(Duration::from_secs(3_600)), 0);
}

#[test]
fn degraded_when_failures_dominate() {
    let (metrics, _) = collector();
    for i in 0..10 {
        metrics.increment(names::REQUESTS_TOTAL, &[]);
        if i < 9 {
            metrics.increment(names::REQUESTS_SUCCESS, &[]);
        } else {
            metrics.increment(names::REQUESTS_FAILED, &[]);
        }
    }

    let health = metrics.health();
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.success_rate_percent, 90.0);
    assert_eq!(health.failed_requests, 1);
    assert_eq!(health.total_requests, 10);
}

#[test]
fn recovered_retry_keeps_relay_healthy() {
    let (metrics, _) = collector();
    // One request picked up twice: a failed attempt, then a completed one.
    metrics.increment(names::REQUESTS_TOTAL, &[]);
    metrics.increment(names::RETRIES_TOTAL, &[]);
    metrics.increment(names::REQUESTS_TOTAL, &[]);
    metrics.increment(names::REQUESTS_SUCCESS, &[]);
    metrics.record(names::RESPONSE_TIME_MS, 1_200.0, &[]);

    let health = metrics.health();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.success_rate_percent, 100.0);
    assert_eq!(health.total_requests, 2);
    assert_eq!(health.failed_requests, 0);
}

#[test]
fn slow_responses_degrade_health() {
    let (metrics, _) = collector();
    metrics.increment(names::REQUESTS_TOTAL, &[]);
    metrics.increment(names::REQUESTS_SUCCESS, &[]);
    metrics.record(names::RESPONSE_TIME_MS, 12_500.0, &[]);

    assert_eq!(metrics.health().status, HealthStatus::Degraded);
}

#[test]
fn health_serializes_with_stable_field_names() {
    let (metrics, clock) = collector();
    clock.advance(Duration::from_secs(90));
    let json = serde_json::to_value(metrics.health()).unwrap();

    assert_eq!(json["status"], "healthy");
    assert_eq!(json["success_rate_percent"], 100.0);
    assert_eq!(json["uptime_seconds"], 90);
    assert_eq!(json["uptime_formatted"], "1m");
    assert_eq!(json["queue_size"], 0);
    assert!(json["last_updated"].is_string());
}

#[test]
fn summaries_cover_every_series() {
    let (metrics, _) = collector();
    let summaries = metrics.summaries(Duration::from_secs(300));
    for name in [
        names::REQUESTS_TOTAL,
        names::REQUESTS_SUCCESS,
        names::REQUESTS_FAILED,
        names::RESPONSE_TIME_MS,
        names::QUEUE_SIZE,
        names::ACTIVE_WORKERS,
        names::RETRIES_TOTAL,
    ] {
        let summary = &summaries[name];
        assert_eq!(summary.window_seconds, 300);
        assert_eq!(summary.count, 0);
    }
}
