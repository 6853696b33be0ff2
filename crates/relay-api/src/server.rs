//! HTTP server setup and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request ID generation
//! 2. Request/response logging
//! 3. Timeout enforcement
//! 4. Handler execution
//!
//! # Graceful Shutdown
//!
//! On SIGTERM or CTRL+C the server stops accepting connections and waits for
//! in-flight requests. Stopping the delivery engine is the caller's job, once
//! [`start_server`] returns.

use std::{future::Future, net::SocketAddr, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{handlers, AppState};

/// Creates the router with every route and the middleware stack.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
///
/// use relay_api::{create_router, AppState};
///
/// fn build(state: AppState) -> axum::Router {
///     create_router(state, Duration::from_secs(10))
/// }
/// ```
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    let ops_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_text))
        .route("/metrics/summary", get(handlers::metrics_summary))
        .route("/status/{callback_token}/{requester_id}", get(handlers::request_status));

    let interaction_routes =
        Router::new().route("/interactions", post(handlers::handle_interaction));

    Router::new()
        .merge(ops_routes)
        .merge(interaction_routes)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Adds an `X-Request-Id` header to every response.
async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;
    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", value);
    }
    response
}

/// Serves the API until `shutdown` resolves.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound.
pub async fn serve_until<F>(
    state: AppState,
    addr: SocketAddr,
    request_timeout: Duration,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state, request_timeout);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Serves the API until SIGTERM or CTRL+C.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound.
pub async fn start_server(
    state: AppState,
    addr: SocketAddr,
    request_timeout: Duration,
) -> Result<(), std::io::Error> {
    serve_until(state, addr, request_timeout, shutdown_signal()).await
}

/// Waits for CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received CTRL+C, starting graceful shutdown"),
        () = terminate => info!("received SIGTERM, starting graceful shutdown"),
    }

    warn!("waiting for in-flight requests to complete");
}
