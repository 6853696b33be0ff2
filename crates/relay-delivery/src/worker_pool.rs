//! Worker pool lifecycle with structured shutdown.
//!
//! The pool owns the worker tasks and the retry scheduler. Shutdown cancels
//! both through one token, lets workers finish the request they hold, then
//! joins every task within the configured timeout. Past the timeout, workers
//! and their in-flight attempts are aborted and joined before returning.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    scheduler::RetryScheduler,
    worker::{DeliveryWorker, WorkerContext},
};

/// Supervised set of delivery workers.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    ctx: Arc<WorkerContext>,
    token: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn new(ctx: Arc<WorkerContext>, token: CancellationToken) -> Self {
        Self { ctx, token, worker_handles: Vec::new() }
    }

    /// Spawns `worker_count` workers. Returns immediately.
    pub(crate) fn spawn_workers(&mut self) {
        let worker_count = self.ctx.config.worker_count;
        info!(worker_count, "spawning delivery workers");

        for worker_id in 0..worker_count {
            let worker = DeliveryWorker::new(worker_id, Arc::clone(&self.ctx), self.token.clone());
            self.worker_handles.push(tokio::spawn(worker.run()));
        }

        info!(spawned_workers = self.worker_handles.len(), "all delivery workers spawned");
    }

    fn scheduler(&self) -> &RetryScheduler {
        &self.ctx.scheduler
    }

    /// Stops intake of new retries, waits for in-flight requests and joins
    /// every worker.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ShutdownTimeout` if the workers do not stop
    /// within `timeout`; they are aborted in that case.
    pub(crate) async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_ms = timeout.as_millis(),
            pending_retries = self.scheduler().pending(),
            "initiating graceful worker shutdown"
        );

        self.token.cancel();
        let mut handles = std::mem::take(&mut self.worker_handles);

        let join_all = async {
            for (worker_id, handle) in handles.iter_mut().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(worker_id, error = %join_error, "worker task ended abnormally");
                }
            }
        };

        let joined = tokio::time::timeout(timeout, join_all).await;
        self.scheduler().shutdown().await;

        if joined.is_err() {
            error!(timeout_ms = timeout.as_millis(), "worker shutdown timed out, aborting");
            for handle in &handles {
                handle.abort();
            }
            for handle in handles {
                let _ = handle.await;
            }
        }

        // Attempts of aborted workers are aborted with them; wait until they are gone.
        self.ctx.attempts.close();
        self.ctx.attempts.wait().await;

        if joined.is_err() {
            return Err(DeliveryError::ShutdownTimeout { timeout });
        }
        info!("worker pool shutdown completed");
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active = self.worker_handles.iter().filter(|h| !h.is_finished()).count();
        if active > 0 && !self.token.is_cancelled() {
            warn!(active_workers = active, "worker pool dropped without shutdown, cancelling");
            self.token.cancel();
        }
    }
}
