//! Worker that drains the queue and drives each request's lifecycle.

use std::{
    any::Any,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use relay_core::{Clock, InteractionRequest, RequestStatus};
use relay_metrics::{names, MetricsCollector};
use tokio_util::{
    sync::CancellationToken,
    task::{AbortOnDropHandle, TaskTracker},
};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    client::{CallbackTarget, DeliveryClient, DeliveryReceipt},
    engine::EngineConfig,
    error::{AttemptError, ProcessingError},
    processor::{ProcessingInput, Processor},
    queue::RequestQueue,
    scheduler::RetryScheduler,
    status::StatusRegistry,
};

/// Components shared by every worker of a pool.
#[derive(Debug)]
pub(crate) struct WorkerContext {
    pub config: EngineConfig,
    pub queue: RequestQueue,
    pub registry: Arc<StatusRegistry>,
    pub scheduler: Arc<RetryScheduler>,
    pub client: Arc<DeliveryClient>,
    pub processor: Arc<dyn Processor>,
    pub metrics: Arc<MetricsCollector>,
    pub clock: Arc<dyn Clock>,
    pub active: Arc<AtomicUsize>,
    /// Per-request attempt tasks, waited on at shutdown.
    pub attempts: TaskTracker,
}

/// One queue consumer.
pub(crate) struct DeliveryWorker {
    id: usize,
    ctx: Arc<WorkerContext>,
    token: CancellationToken,
}

impl DeliveryWorker {
    pub(crate) fn new(id: usize, ctx: Arc<WorkerContext>, token: CancellationToken) -> Self {
        Self { id, ctx, token }
    }

    /// Main loop. Returns once the token is cancelled; a request already
    /// taken from the queue is always finished first.
    pub(crate) async fn run(self) {
        info!(worker_id = self.id, "worker starting");

        loop {
            if self.token.is_cancelled() {
                break;
            }

            let next = tokio::select! {
                next = self.ctx.queue.next(self.ctx.config.poll_interval) => next,
                () = self.token.cancelled() => break,
            };

            if let Some(request) = next {
                self.handle(request).await;
            }
        }

        info!(worker_id = self.id, "worker stopped");
    }

    /// Runs one request through processing and delivery and settles its
    /// next state.
    pub(crate) async fn handle(&self, mut request: InteractionRequest) {
        let key = request.key();

        if let Err(e) = request.begin_processing() {
            error!(worker_id = self.id, request_key = %key, error = %e, "cannot process request");
            return;
        }
        self.ctx.registry.record(&request, self.ctx.clock.now_system()).await;

        let active = self.ctx.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.ctx.metrics.set_gauge(names::ACTIVE_WORKERS, active);
        self.ctx.metrics.increment(names::REQUESTS_TOTAL, &[]);
        self.ctx.metrics.set_gauge(names::QUEUE_SIZE, self.ctx.queue.len());

        debug!(
            worker_id = self.id,
            request_key = %key,
            attempt = request.retry_count() + 1,
            "processing request"
        );

        let outcome = self.attempt(&request).await;
        self.settle(request, outcome).await;

        let active = self.ctx.active.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        self.ctx.metrics.set_gauge(names::ACTIVE_WORKERS, active);
    }

    /// Processor then delivery, in a task of its own so a panic in either
    /// is contained to this request. Aborting the worker aborts the task.
    async fn attempt(&self, request: &InteractionRequest) -> Result<DeliveryReceipt, AttemptError> {
        let input = ProcessingInput::from(request);
        let target = CallbackTarget::from(request);
        let processor = Arc::clone(&self.ctx.processor);
        let client = Arc::clone(&self.ctx.client);
        let max_retries = self.ctx.config.delivery_max_retries;

        let span = info_span!(
            "request_attempt",
            worker_id = self.id,
            request_id = %request.id(),
            retry = request.retry_count()
        );

        let task = AbortOnDropHandle::new(self.ctx.attempts.spawn(
            async move {
                let content = processor.process(&input).await?;
                let receipt = client.deliver(&target, &content, max_retries).await?;
                Ok::<_, AttemptError>(receipt)
            }
            .instrument(span),
        ));

        match task.await {
            Ok(result) => result,
            Err(join) if join.is_panic() => {
                let message = panic_message(join.into_panic());
                Err(ProcessingError::panicked(message).into())
            },
            Err(join) => Err(ProcessingError::failed(format!("attempt aborted: {join}")).into()),
        }
    }

    async fn settle(
        &self,
        mut request: InteractionRequest,
        outcome: Result<DeliveryReceipt, AttemptError>,
    ) {
        let key = request.key();
        let now = self.ctx.clock.now_system();

        match outcome {
            Ok(receipt) => {
                if let Err(e) = request.complete() {
                    error!(
                        worker_id = self.id,
                        request_key = %key,
                        error = %e,
                        "lifecycle violation"
                    );
                    return;
                }
                self.ctx.metrics.increment(names::REQUESTS_SUCCESS, &[]);
                self.ctx.metrics.record(
                    names::RESPONSE_TIME_MS,
                    request.age(now).as_secs_f64() * 1000.0,
                    &[],
                );
                self.ctx.registry.record(&request, now).await;
                info!(
                    worker_id = self.id,
                    request_key = %key,
                    attempts = receipt.attempts,
                    rate_limit_waits = receipt.rate_limit_waits,
                    "request completed"
                );
            },
            Err(failure) => {
                warn!(
                    worker_id = self.id,
                    request_key = %key,
                    category = %failure.category(),
                    error = %failure,
                    "attempt failed"
                );

                let next = match request.fail_attempt() {
                    Ok(next) => next,
                    Err(e) => {
                        error!(
                            worker_id = self.id,
                            request_key = %key,
                            error = %e,
                            "lifecycle violation"
                        );
                        return;
                    },
                };
                if next == RequestStatus::Failed {
                    self.ctx.metrics.increment(names::REQUESTS_FAILED, &[]);
                }
                self.ctx.registry.record(&request, now).await;

                if next == RequestStatus::Retrying {
                    let delay = self.ctx.config.retry_policy.delay_for(request.retry_count());
                    self.ctx.metrics.increment(names::RETRIES_TOTAL, &[]);
                    info!(
                        worker_id = self.id,
                        request_key = %key,
                        retry = request.retry_count() + 1,
                        delay_ms = delay.as_millis(),
                        "scheduling retry"
                    );
                    self.ctx.scheduler.schedule(request, delay);
                } else {
                    error!(
                        worker_id = self.id,
                        request_key = %key,
                        retries = request.retry_count(),
                        "request failed permanently"
                    );
                    self.notify(&request).await;
                }
            },
        }
    }

    async fn notify(&self, request: &InteractionRequest) {
        let target = CallbackTarget::from(request);
        let notice = &self.ctx.config.failure_notice;
        if let Err(e) = self.ctx.client.notify_failure(&target, notice).await {
            warn!(request_key = %request.key(), error = %e, "failure notice not delivered");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_messages_are_extracted() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7_u8)), "non-string panic payload");
    }
}
