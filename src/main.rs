//! Deferred callback relay service.
//!
//! Main entry point. Loads configuration, wires the delivery engine and the
//! HTTP API, and coordinates graceful startup and shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use relay_api::{AppState, Config};
use relay_core::{Clock, RealClock};
use relay_delivery::{DeliveryClient, DeliveryEngine, HttpProcessor};
use relay_metrics::MetricsCollector;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        workers = config.worker_count,
        queue_capacity = config.queue_capacity,
        max_retries = config.max_retries,
        callback_api_base = %config.callback_api_base,
        processor_url = %config.processor_url,
        "starting callback relay"
    );

    let verifier = Arc::new(config.verifier()?);
    let addr = config.parse_server_addr()?;

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let client = Arc::new(
        DeliveryClient::new(config.to_client_config(), Arc::clone(&clock))
            .context("failed to build delivery client")?,
    );
    let processor = Arc::new(
        HttpProcessor::new(&config.processor_url, config.processor_timeout())
            .context("failed to build processor client")?,
    );
    let metrics = Arc::new(MetricsCollector::new(config.to_metrics_config(), Arc::clone(&clock)));

    let engine = Arc::new(DeliveryEngine::new(
        config.to_engine_config(),
        client,
        processor,
        metrics,
        clock,
    ));
    engine.start().await;

    let state = AppState::new(Arc::clone(&engine), verifier);
    let served = relay_api::start_server(state, addr, config.request_timeout()).await;
    if let Err(e) = &served {
        error!(error = %e, "HTTP server failed");
    }

    if let Err(e) = engine.shutdown().await {
        error!(error = %e, "delivery engine did not stop cleanly");
    }

    info!("callback relay shutdown complete");
    served.context("HTTP server failed")
}

/// Initializes tracing; `RUST_LOG` wins over the configured filter.
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}
