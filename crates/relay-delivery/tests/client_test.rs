//! Integration tests for the callback delivery client.
//!
//! Covers the attempt budget, backoff between failed attempts, rate-limit
//! waits and the one-shot failure notice.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use relay_delivery::{
    client::{EPHEMERAL_FLAG, MAX_RETRY_AFTER},
    CallbackTarget, ClientConfig, DeliveryClient, DeliveryError,
};
use relay_testing::{MockCallback, MockResponse, TestClock, TestRelay, TEST_ORIGIN};

fn client_for(callback: &MockCallback, clock: &TestClock) -> DeliveryClient {
    DeliveryClient::new(TestRelay::client_config(callback.api_base()), Arc::new(clock.clone()))
        .expect("client should build")
}

fn secs(values: &[u64]) -> Vec<Duration> {
    values.iter().copied().map(Duration::from_secs).collect()
}

#[tokio::test]
async fn delivers_on_first_ok() {
    let callback = MockCallback::start().await;
    callback.respond_in_sequence(TEST_ORIGIN, "tok-ok", [MockResponse::Ok]).await;
    let clock = TestClock::new();
    let client = client_for(&callback, &clock);

    let receipt = client
        .deliver(&CallbackTarget::new(TEST_ORIGIN, "tok-ok"), "the answer", 3)
        .await
        .expect("delivery should succeed");

    assert_eq!(receipt.attempts, 1);
    assert_eq!(receipt.rate_limit_waits, 0);
    assert!(clock.sleeps().is_empty());

    let bodies = callback.bodies(TEST_ORIGIN, "tok-ok").await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["content"], "the answer");
    assert!(bodies[0].get("flags").is_none());
}

#[tokio::test]
async fn server_errors_back_off_then_succeed() {
    let callback = MockCallback::start().await;
    callback
        .respond_in_sequence(TEST_ORIGIN, "tok-5xx", [
            MockResponse::Status(500),
            MockResponse::Status(500),
            MockResponse::Status(500),
            MockResponse::Ok,
        ])
        .await;
    let clock = TestClock::new();
    let client = client_for(&callback, &clock);

    let receipt = client
        .deliver(&CallbackTarget::new(TEST_ORIGIN, "tok-5xx"), "done", 3)
        .await
        .expect("fourth attempt should succeed");

    assert_eq!(receipt.attempts, 4);
    assert_eq!(callback.bodies(TEST_ORIGIN, "tok-5xx").await.len(), 4);
    assert_eq!(clock.sleeps(), secs(&[1, 2, 5]));
}

#[tokio::test]
async fn exhausted_attempts_report_last_error() {
    let callback = MockCallback::start().await;
    callback.respond_in_sequence(TEST_ORIGIN, "tok-down", [MockResponse::Status(503)]).await;
    let clock = TestClock::new();
    let client = client_for(&callback, &clock);

    let err = client
        .deliver(&CallbackTarget::new(TEST_ORIGIN, "tok-down"), "x", 2)
        .await
        .expect_err("every attempt fails");

    match err {
        DeliveryError::RetriesExhausted { attempts, last_error } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("503"), "unexpected last error: {last_error}");
        },
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(callback.bodies(TEST_ORIGIN, "tok-down").await.len(), 3);
    assert_eq!(clock.sleeps(), secs(&[1, 2]));
}

#[tokio::test]
async fn zero_retries_means_single_attempt() {
    let callback = MockCallback::start().await;
    callback.respond_in_sequence(TEST_ORIGIN, "tok-once", [MockResponse::Status(400)]).await;
    let clock = TestClock::new();
    let client = client_for(&callback, &clock);

    let err = client.deliver(&CallbackTarget::new(TEST_ORIGIN, "tok-once"), "x", 0).await;

    assert!(matches!(err, Err(DeliveryError::RetriesExhausted { attempts: 1, .. })));
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn rate_limit_waits_do_not_consume_attempts() {
    let callback = MockCallback::start().await;
    callback
        .respond_in_sequence(TEST_ORIGIN, "tok-429", [
            MockResponse::rate_limited("2"),
            MockResponse::Ok,
        ])
        .await;
    let clock = TestClock::new();
    let client = client_for(&callback, &clock);

    let receipt = client
        .deliver(&CallbackTarget::new(TEST_ORIGIN, "tok-429"), "hi", 0)
        .await
        .expect("should succeed after waiting out the 429");

    assert_eq!(receipt.attempts, 1);
    assert_eq!(receipt.rate_limit_waits, 1);
    assert_eq!(callback.bodies(TEST_ORIGIN, "tok-429").await.len(), 2);
    assert_eq!(clock.sleeps(), secs(&[2]));
}

#[tokio::test]
async fn missing_retry_after_waits_one_second() {
    let callback = MockCallback::start().await;
    callback
        .respond_in_sequence(TEST_ORIGIN, "tok-bare", [
            MockResponse::RateLimited { retry_after: None },
            MockResponse::Ok,
        ])
        .await;
    let clock = TestClock::new();
    let client = client_for(&callback, &clock);

    client
        .deliver(&CallbackTarget::new(TEST_ORIGIN, "tok-bare"), "hi", 3)
        .await
        .expect("delivery should succeed");

    assert_eq!(clock.sleeps(), secs(&[1]));
}

#[tokio::test]
async fn oversized_retry_after_waits_at_most_the_cap() {
    let callback = MockCallback::start().await;
    callback
        .respond_in_sequence(TEST_ORIGIN, "tok-huge", [
            MockResponse::rate_limited("99999999999999999999"),
            MockResponse::Ok,
        ])
        .await;
    let clock = TestClock::new();
    let client = client_for(&callback, &clock);

    let receipt = client
        .deliver(&CallbackTarget::new(TEST_ORIGIN, "tok-huge"), "hi", 0)
        .await
        .expect("an absurd Retry-After is still just a rate limit");

    assert_eq!(receipt.attempts, 1);
    assert_eq!(receipt.rate_limit_waits, 1);
    assert_eq!(clock.sleeps(), vec![MAX_RETRY_AFTER]);
}

#[tokio::test]
async fn endless_rate_limiting_gives_up_at_cap() {
    let callback = MockCallback::start().await;
    callback
        .respond_in_sequence(TEST_ORIGIN, "tok-flood", [MockResponse::rate_limited("0.5")])
        .await;
    let clock = TestClock::new();
    let config = ClientConfig {
        max_rate_limit_waits: 3,
        ..TestRelay::client_config(callback.api_base())
    };
    let client = DeliveryClient::new(config, Arc::new(clock.clone())).unwrap();

    let err = client
        .deliver(&CallbackTarget::new(TEST_ORIGIN, "tok-flood"), "hi", 3)
        .await
        .expect_err("cap should be reached");

    assert!(matches!(err, DeliveryError::RateLimited { waits: 3, .. }));
    assert_eq!(callback.bodies(TEST_ORIGIN, "tok-flood").await.len(), 4);
    assert_eq!(clock.sleeps(), vec![Duration::from_millis(500); 3]);
}

#[tokio::test]
async fn slow_endpoint_times_out_as_failed_attempt() {
    let callback = MockCallback::start().await;
    callback
        .respond_in_sequence(TEST_ORIGIN, "tok-slow", [
            MockResponse::Slow(Duration::from_millis(500)),
            MockResponse::Ok,
        ])
        .await;
    let clock = TestClock::new();
    let config = ClientConfig {
        timeout: Duration::from_millis(100),
        ..TestRelay::client_config(callback.api_base())
    };
    let client = DeliveryClient::new(config, Arc::new(clock.clone())).unwrap();

    let receipt = client
        .deliver(&CallbackTarget::new(TEST_ORIGIN, "tok-slow"), "hi", 1)
        .await
        .expect("second attempt should succeed");

    assert_eq!(receipt.attempts, 2);
    assert_eq!(clock.sleeps(), secs(&[1]));
}

#[tokio::test]
async fn long_content_is_truncated() {
    let callback = MockCallback::start().await;
    callback.respond_in_sequence(TEST_ORIGIN, "tok-long", [MockResponse::Ok]).await;
    let clock = TestClock::new();
    let client = client_for(&callback, &clock);

    client
        .deliver(&CallbackTarget::new(TEST_ORIGIN, "tok-long"), &"a".repeat(2500), 0)
        .await
        .unwrap();

    let bodies = callback.bodies(TEST_ORIGIN, "tok-long").await;
    let content = bodies[0]["content"].as_str().unwrap();
    assert_eq!(content.chars().count(), 2000);
    assert!(content.ends_with("..."));
}

#[tokio::test]
async fn failure_notice_is_ephemeral_and_sent_once() {
    let callback = MockCallback::start().await;
    callback.respond_in_sequence(TEST_ORIGIN, "tok-notice", [MockResponse::Status(500)]).await;
    let clock = TestClock::new();
    let client = client_for(&callback, &clock);

    let err = client
        .notify_failure(&CallbackTarget::new(TEST_ORIGIN, "tok-notice"), "sorry")
        .await
        .expect_err("500 is not a success");

    assert!(matches!(err, DeliveryError::HttpStatus { status_code: 500, .. }));
    let bodies = callback.bodies(TEST_ORIGIN, "tok-notice").await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["content"], "sorry");
    assert_eq!(bodies[0]["flags"], EPHEMERAL_FLAG);
    assert!(clock.sleeps().is_empty());
}
