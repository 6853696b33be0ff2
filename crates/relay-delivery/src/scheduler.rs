//! Cancellable delayed re-submission of failed requests.
//!
//! Each scheduled retry is a task that sleeps on the injected clock and then
//! moves the request from RETRYING back to PENDING and into the queue.
//! Cancelling the scheduler drops every pending retry; shutdown then joins
//! the tasks so none outlives the pool.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use relay_core::{Clock, InteractionRequest};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{queue::RequestQueue, status::StatusRegistry};

/// Owner of all pending request-level retries.
#[derive(Debug)]
pub struct RetryScheduler {
    queue: RequestQueue,
    registry: Arc<StatusRegistry>,
    clock: Arc<dyn Clock>,
    token: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
}

impl RetryScheduler {
    /// Creates a scheduler re-submitting into `queue`.
    pub fn new(
        queue: RequestQueue,
        registry: Arc<StatusRegistry>,
        clock: Arc<dyn Clock>,
        token: CancellationToken,
    ) -> Self {
        Self { queue, registry, clock, token, tasks: Mutex::new(JoinSet::new()) }
    }

    /// Schedules `request` to re-enter the queue after `delay`.
    ///
    /// The request must be in RETRYING. If the scheduler is already
    /// cancelled the request is dropped.
    pub fn schedule(&self, request: InteractionRequest, delay: Duration) {
        if self.token.is_cancelled() {
            warn!(request_key = %request.key(), "retry dropped, scheduler is shut down");
            return;
        }

        let queue = self.queue.clone();
        let registry = Arc::clone(&self.registry);
        let clock = Arc::clone(&self.clock);
        let token = self.token.clone();

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}

        tasks.spawn(async move {
            let mut request = request;
            let key = request.key();

            tokio::select! {
                () = clock.sleep(delay) => {},
                () = token.cancelled() => {
                    debug!(request_key = %key, "pending retry cancelled");
                    return;
                }
            }

            if let Err(e) = request.requeue() {
                error!(request_key = %key, error = %e, "retry rejected by lifecycle");
                return;
            }
            registry.record(&request, clock.now_system()).await;
            let retry = request.retry_count();

            tokio::select! {
                result = queue.requeue(request) => match result {
                    Ok(()) => debug!(request_key = %key, retry, "request re-queued"),
                    Err(_) => warn!(request_key = %key, "queue closed, retry dropped"),
                },
                () = token.cancelled() => {
                    debug!(request_key = %key, "retry cancelled while waiting for queue space");
                }
            }
        });
    }

    /// Retries currently waiting.
    pub fn pending(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Cancels every pending retry and waits for the tasks to finish.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let mut tasks =
            std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        let cancelled = tasks.len();

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "retry task failed");
            }
        }
        info!(cancelled, "retry scheduler stopped");
    }
}
