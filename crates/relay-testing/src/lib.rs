//! Test infrastructure for the callback relay.
//!
//! Provides interaction fixtures, scripted processors, a wiremock-backed
//! callback endpoint and [`TestRelay`], a fully wired engine running on a
//! [`TestClock`] so backoff waits complete instantly.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use relay_core::{Clock, RequestStatus};
use relay_delivery::{
    ClientConfig, DeliveryClient, DeliveryEngine, EngineConfig, RetryPolicy, StatusSnapshot,
};
use relay_metrics::{MetricsCollector, MetricsConfig};

pub mod fixtures;
pub mod http;
pub mod processor;

pub use fixtures::{request_details, InteractionBuilder};
pub use http::{MockCallback, MockResponse};
pub use processor::{ScriptedProcessor, Step};
pub use relay_core::TestClock;

/// Origin id used by fixtures.
pub const TEST_ORIGIN: &str = "app-test";

/// Engine wired to a mock callback endpoint and a virtual clock.
pub struct TestRelay {
    /// The engine under test.
    pub engine: Arc<DeliveryEngine>,
    /// Mock callback endpoint.
    pub callback: MockCallback,
    /// Processor shared with the engine.
    pub processor: ScriptedProcessor,
    /// Virtual clock shared by every component.
    pub clock: TestClock,
    /// Metrics shared with the engine.
    pub metrics: Arc<MetricsCollector>,
}

impl TestRelay {
    /// Engine configuration tuned for tests: one worker and a short poll.
    pub fn test_config() -> EngineConfig {
        EngineConfig {
            worker_count: 1,
            poll_interval: Duration::from_millis(20),
            shutdown_timeout: Duration::from_secs(5),
            ..EngineConfig::default()
        }
    }

    /// Client configuration pointing at `api_base` with a short timeout.
    pub fn client_config(api_base: String) -> ClientConfig {
        ClientConfig {
            api_base,
            timeout: Duration::from_secs(2),
            notice_timeout: Duration::from_secs(2),
            retry_policy: RetryPolicy::default(),
            ..ClientConfig::default()
        }
    }

    /// Builds an engine around `processor` without starting it.
    ///
    /// # Errors
    ///
    /// Returns an error if the delivery client cannot be built.
    pub async fn build(config: EngineConfig, processor: ScriptedProcessor) -> Result<Self> {
        let clock = TestClock::new();
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let callback = MockCallback::start().await;
        let client = Arc::new(DeliveryClient::new(
            Self::client_config(callback.api_base()),
            Arc::clone(&shared_clock),
        )?);
        let metrics =
            Arc::new(MetricsCollector::new(MetricsConfig::default(), Arc::clone(&shared_clock)));
        let engine = Arc::new(DeliveryEngine::new(
            config,
            client,
            Arc::new(processor.clone()),
            Arc::clone(&metrics),
            shared_clock,
        ));

        Ok(Self { engine, callback, processor, clock, metrics })
    }

    /// Builds and starts an engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the delivery client cannot be built.
    pub async fn start(config: EngineConfig, processor: ScriptedProcessor) -> Result<Self> {
        let relay = Self::build(config, processor).await?;
        relay.engine.start().await;
        Ok(relay)
    }

    /// Polls until the request reaches `expected` or `timeout` of real time
    /// passes.
    ///
    /// # Errors
    ///
    /// Returns an error describing the last seen status on timeout.
    pub async fn wait_for_status(
        &self,
        token: &str,
        requester_id: &str,
        expected: RequestStatus,
        timeout: Duration,
    ) -> Result<StatusSnapshot> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let snapshot = self.engine.status_of(token, requester_id).await;
            if let Some(s) = snapshot.as_ref().filter(|s| s.status == expected) {
                return Ok(s.clone());
            }
            if tokio::time::Instant::now() >= deadline {
                bail!(
                    "request {token} did not reach {expected} within {timeout:?}, last seen {:?}",
                    snapshot.map(|s| s.status)
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
