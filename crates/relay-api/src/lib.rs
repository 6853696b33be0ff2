//! Callback relay HTTP API.
//!
//! Verifies and acknowledges inbound interactions, hands them to the
//! [`DeliveryEngine`](relay_delivery::DeliveryEngine), and exposes health,
//! metrics and request status.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use relay_delivery::DeliveryEngine;

pub mod config;
pub mod crypto;
pub mod handlers;
pub mod server;

pub use config::Config;
pub use crypto::{Ed25519Verifier, SignatureVerifier};
pub use server::{create_router, start_server};

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The delivery engine requests are submitted to.
    pub engine: Arc<DeliveryEngine>,
    /// Verifier for inbound signatures.
    pub verifier: Arc<dyn SignatureVerifier>,
}

impl AppState {
    /// Creates state from an engine and a verifier.
    pub fn new(engine: Arc<DeliveryEngine>, verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self { engine, verifier }
    }
}
