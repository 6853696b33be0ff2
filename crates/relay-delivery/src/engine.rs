//! Delivery engine wiring the queue, workers, scheduler and metrics.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use relay_core::{Clock, InteractionRequest, RequestDetails, RequestId, RequestKey};
use relay_metrics::{names, MetricSummary, MetricsCollector, SystemHealth};
use serde_json::Value;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{interval, Interval, MissedTickBehavior},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::{
    client::DeliveryClient,
    error::{Result, SubmitError},
    interaction::RawInteraction,
    processor::Processor,
    queue::{QueueSlot, RequestQueue, ReserveError},
    retry::RetryPolicy,
    scheduler::RetryScheduler,
    status::{StatusRegistry, StatusSnapshot},
    worker::WorkerContext,
    worker_pool::WorkerPool,
};

/// Default message sent to the requester when a request fails for good.
pub const DEFAULT_FAILURE_NOTICE: &str =
    "Sorry, something went wrong while processing your message. Please try again in a few moments.";

/// Shortest maintenance cadence; smaller configured values are raised to it.
pub const MIN_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for the delivery engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Number of concurrent workers.
    pub worker_count: usize,
    /// Maximum requests waiting in the queue.
    pub queue_capacity: usize,
    /// Request-level retry budget assigned at submission.
    pub max_retries: u32,
    /// Retry budget passed to each delivery call.
    pub delivery_max_retries: u32,
    /// Delays between request-level retries.
    pub retry_policy: RetryPolicy,
    /// How long a worker waits on an empty queue before re-checking shutdown.
    pub poll_interval: Duration,
    /// Maximum time to wait for workers on shutdown.
    pub shutdown_timeout: Duration,
    /// Cadence of metric eviction and status purging, at least
    /// [`MIN_MAINTENANCE_INTERVAL`].
    pub maintenance_interval: Duration,
    /// Age beyond which metric points are evicted.
    pub metrics_retention: Duration,
    /// Age beyond which finished request statuses are purged.
    pub status_retention: Duration,
    /// Message sent once when a request fails permanently.
    pub failure_notice: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            queue_capacity: crate::DEFAULT_QUEUE_CAPACITY,
            max_retries: crate::DEFAULT_MAX_RETRIES,
            delivery_max_retries: crate::DEFAULT_MAX_RETRIES,
            retry_policy: RetryPolicy::default(),
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
            maintenance_interval: Duration::from_secs(3_600),
            metrics_retention: Duration::from_secs(86_400),
            status_retention: Duration::from_secs(3_600),
            failure_notice: DEFAULT_FAILURE_NOTICE.to_string(),
        }
    }
}

/// What one maintenance pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Metric points evicted.
    pub metric_points_evicted: usize,
    /// Finished request statuses purged.
    pub statuses_purged: usize,
}

/// Entry point of the relay pipeline.
///
/// Shared behind an `Arc` between the inbound surface and the binary;
/// every method takes `&self`.
#[derive(Debug)]
pub struct DeliveryEngine {
    config: EngineConfig,
    queue: RequestQueue,
    registry: Arc<StatusRegistry>,
    metrics: Arc<MetricsCollector>,
    clock: Arc<dyn Clock>,
    ctx: Arc<WorkerContext>,
    token: CancellationToken,
    accepting: AtomicBool,
    pool: Mutex<Option<WorkerPool>>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryEngine {
    /// Builds an engine. Nothing runs until [`DeliveryEngine::start`].
    pub fn new(
        config: EngineConfig,
        client: Arc<DeliveryClient>,
        processor: Arc<dyn Processor>,
        metrics: Arc<MetricsCollector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let queue = RequestQueue::new(config.queue_capacity);
        let registry = Arc::new(StatusRegistry::new());
        let token = CancellationToken::new();
        let scheduler = Arc::new(RetryScheduler::new(
            queue.clone(),
            Arc::clone(&registry),
            Arc::clone(&clock),
            token.clone(),
        ));

        let ctx = Arc::new(WorkerContext {
            config: config.clone(),
            queue: queue.clone(),
            registry: Arc::clone(&registry),
            scheduler,
            client,
            processor,
            metrics: Arc::clone(&metrics),
            clock: Arc::clone(&clock),
            active: Arc::new(AtomicUsize::new(0)),
            attempts: TaskTracker::new(),
        });

        Self {
            config,
            queue,
            registry,
            metrics,
            clock,
            ctx,
            token,
            accepting: AtomicBool::new(true),
            pool: Mutex::new(None),
            maintenance: Mutex::new(None),
        }
    }

    /// Spawns the workers and the maintenance task. Calling it twice is a
    /// no-op.
    pub async fn start(&self) {
        let mut pool_slot = self.pool.lock().await;
        if pool_slot.is_some() {
            warn!("delivery engine already started");
            return;
        }

        info!(
            worker_count = self.config.worker_count,
            queue_capacity = self.config.queue_capacity,
            max_retries = self.config.max_retries,
            "starting delivery engine"
        );

        let mut pool = WorkerPool::new(Arc::clone(&self.ctx), self.token.clone());
        pool.spawn_workers();
        *pool_slot = Some(pool);

        *self.maintenance.lock().await = Some(self.spawn_maintenance());
        info!("delivery engine started");
    }

    /// Accepts a raw inbound interaction.
    ///
    /// A queue slot is reserved before anything is parsed, so a rejected
    /// submission never builds a request. The prompt option becomes the
    /// payload.
    ///
    /// # Errors
    ///
    /// - `QueueFull` at capacity
    /// - `Malformed` if the token, application id, user id or prompt is
    ///   missing
    /// - `ShuttingDown` after shutdown began
    pub async fn submit(&self, raw: &Value) -> std::result::Result<RequestId, SubmitError> {
        let slot = self.reserve()?;
        let interaction = RawInteraction::from_value(raw)?;
        let prompt = interaction.prompt().ok_or_else(|| SubmitError::malformed("missing prompt"))?;
        let details = interaction.into_details(prompt)?;
        self.enqueue(slot, details).await
    }

    /// Accepts already-typed request fields.
    ///
    /// # Errors
    ///
    /// Same as [`DeliveryEngine::submit`].
    pub async fn submit_details(
        &self,
        details: RequestDetails,
    ) -> std::result::Result<RequestId, SubmitError> {
        let slot = self.reserve()?;
        self.enqueue(slot, details).await
    }

    fn reserve(&self) -> std::result::Result<QueueSlot<'_>, SubmitError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(SubmitError::ShuttingDown);
        }
        self.queue.reserve().map_err(|e| match e {
            ReserveError::Full => {
                warn!(capacity = self.queue.capacity(), "queue full, rejecting submission");
                SubmitError::QueueFull { capacity: self.queue.capacity() }
            },
            ReserveError::Closed => SubmitError::ShuttingDown,
        })
    }

    async fn enqueue(
        &self,
        slot: QueueSlot<'_>,
        details: RequestDetails,
    ) -> std::result::Result<RequestId, SubmitError> {
        let request =
            InteractionRequest::new(details, self.config.max_retries, self.clock.now_system())
                .map_err(|e| SubmitError::malformed(e.to_string()))?;
        let id = request.id();
        let key = request.key();

        self.registry.record(&request, self.clock.now_system()).await;
        slot.send(request);

        self.metrics.set_gauge(names::QUEUE_SIZE, self.queue.len());
        self.metrics.set_gauge(names::ACTIVE_WORKERS, self.in_flight());
        debug!(request_key = %key, request_id = %id, "request queued");
        Ok(id)
    }

    /// Requests waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Requests currently held by a worker.
    pub fn in_flight(&self) -> usize {
        self.ctx.active.load(Ordering::Acquire)
    }

    /// Retries waiting for their backoff to elapse.
    pub fn pending_retries(&self) -> usize {
        self.ctx.scheduler.pending()
    }

    /// Latest known status of a request.
    pub async fn status_of(
        &self,
        callback_token: &str,
        requester_id: &str,
    ) -> Option<StatusSnapshot> {
        self.registry.get(&RequestKey::new(callback_token, requester_id)).await
    }

    /// Health snapshot with live queue and worker figures.
    pub fn health(&self) -> SystemHealth {
        let mut health = self.metrics.health();
        health.queue_size = self.queue_len();
        health.active_workers = self.in_flight();
        health
    }

    /// Summaries of every metric over `window`.
    pub fn summaries(&self, window: Duration) -> BTreeMap<String, MetricSummary> {
        self.metrics.summaries(window)
    }

    /// Flat text export of the latest metric values.
    pub fn export_text(&self) -> String {
        self.metrics.export_text()
    }

    /// Evicts metric points older than `max_age`.
    pub fn evict_metrics_older_than(&self, max_age: Duration) -> usize {
        self.metrics.evict_older_than(max_age)
    }

    /// One maintenance pass: metric eviction and status purge.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        maintenance_pass(&self.metrics, &self.registry, &self.clock, &self.config).await
    }

    fn spawn_maintenance(&self) -> JoinHandle<()> {
        let metrics = Arc::clone(&self.metrics);
        let registry = Arc::clone(&self.registry);
        let clock = Arc::clone(&self.clock);
        let config = self.config.clone();
        let token = self.token.clone();

        tokio::spawn(async move {
            let mut ticker = maintenance_ticker(config.maintenance_interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        maintenance_pass(&metrics, &registry, &clock, &config).await;
                    }
                    () = token.cancelled() => break,
                }
            }
            debug!("maintenance task stopped");
        })
    }

    /// Stops intake, cancels pending retries, waits for in-flight requests
    /// and joins every task.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ShutdownTimeout` if workers do not stop in
    /// time.
    pub async fn shutdown(&self) -> Result<()> {
        info!("shutting down delivery engine");
        self.accepting.store(false, Ordering::Release);

        let pool = self.pool.lock().await.take();
        let result = match pool {
            Some(pool) => pool.shutdown_graceful(self.config.shutdown_timeout).await,
            None => {
                self.token.cancel();
                self.ctx.scheduler.shutdown().await;
                info!("delivery engine was not started, shutdown completed immediately");
                Ok(())
            },
        };

        if let Some(handle) = self.maintenance.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "maintenance task ended abnormally");
            }
        }

        result
    }
}

fn maintenance_ticker(period: Duration) -> Interval {
    let mut ticker = interval(period.max(MIN_MAINTENANCE_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn maintenance_pass(
    metrics: &MetricsCollector,
    registry: &StatusRegistry,
    clock: &Arc<dyn Clock>,
    config: &EngineConfig,
) -> MaintenanceReport {
    let report = MaintenanceReport {
        metric_points_evicted: metrics.evict_older_than(config.metrics_retention),
        statuses_purged: registry.purge_terminal(config.status_retention, clock.now_system()).await,
    };
    debug!(
        metric_points_evicted = report.metric_points_evicted,
        statuses_purged = report.statuses_purged,
        "maintenance pass finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_maintenance_interval_is_raised() {
        assert_eq!(maintenance_ticker(Duration::ZERO).period(), MIN_MAINTENANCE_INTERVAL);
        assert_eq!(maintenance_ticker(Duration::from_secs(60)).period(), Duration::from_secs(60));
    }
}
