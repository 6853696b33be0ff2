//! Deferred processing pipeline for the callback relay.
//!
//! Requests are acknowledged at the edge and handed to this crate, which
//! processes them out-of-band and delivers the result to a callback endpoint.
//!
//! # Architecture
//!
//! A bounded [`RequestQueue`] feeds a fixed pool of tokio workers. For each
//! request a worker:
//!
//! 1. **Claims** it from the queue and marks it PROCESSING
//! 2. **Processes** it through the injected [`Processor`]
//! 3. **Delivers** the result with [`DeliveryClient`], waiting out 429s
//! 4. **Settles** it as COMPLETED, or hands it to the [`RetryScheduler`]
//!    for a delayed re-submission, or marks it FAILED and sends one notice
//!
//! Backpressure is by rejection: a full queue refuses new submissions
//! instead of blocking. Shutdown cancels pending retries, lets workers finish
//! the request they hold and joins every task.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use relay_core::{Clock, RealClock};
//! use relay_delivery::{
//!     ClientConfig, DeliveryClient, DeliveryEngine, EngineConfig, HttpProcessor,
//! };
//! use relay_metrics::{MetricsCollector, MetricsConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
//! let client = Arc::new(DeliveryClient::new(ClientConfig::default(), clock.clone())?);
//! let processor = Arc::new(HttpProcessor::new(
//!     "http://localhost:8081/process",
//!     std::time::Duration::from_secs(25),
//! )?);
//! let metrics = Arc::new(MetricsCollector::new(MetricsConfig::default(), clock.clone()));
//!
//! let engine = DeliveryEngine::new(EngineConfig::default(), client, processor, metrics, clock);
//! engine.start().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod engine;
pub mod error;
pub mod interaction;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod status;
mod worker;
mod worker_pool;

pub use client::{CallbackTarget, ClientConfig, DeliveryClient, DeliveryReceipt};
pub use engine::{DeliveryEngine, EngineConfig, MaintenanceReport};
pub use error::{
    AttemptError, DeliveryError, ErrorCategory, ProcessingError, Result, SubmitError,
};
pub use interaction::{InteractionKind, RawInteraction};
pub use processor::{HttpProcessor, ProcessingInput, Processor};
pub use queue::RequestQueue;
pub use retry::RetryPolicy;
pub use scheduler::RetryScheduler;
pub use status::{StatusRegistry, StatusSnapshot};

/// Default number of concurrent workers.
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default retry budget, both per request and per delivery call.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Default maximum length of delivered content, in characters.
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 2000;
