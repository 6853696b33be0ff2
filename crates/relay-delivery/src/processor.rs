//! The long-running computation that turns a request into result text.
//!
//! The pipeline only sees the [`Processor`] trait. [`HttpProcessor`] is the
//! adapter used by the binary: it forwards the input to an upstream service
//! and returns the text it answers with.

use std::time::Duration;

use async_trait::async_trait;
use relay_core::{ContextIds, InteractionRequest};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProcessingError;

/// Everything a processor may use to produce a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingInput {
    /// Text to process.
    pub payload: String,
    /// Requester identifier.
    pub requester_id: String,
    /// Requester roles.
    pub roles: Vec<String>,
    /// Requester display name.
    pub display_name: String,
    /// Callback token, for processors that keep per-conversation state.
    pub callback_token: String,
    /// Optional grouping identifiers.
    pub context_ids: ContextIds,
}

impl From<&InteractionRequest> for ProcessingInput {
    fn from(request: &InteractionRequest) -> Self {
        let details = request.details();
        Self {
            payload: details.payload.clone(),
            requester_id: details.requester_id.clone(),
            roles: details.roles.clone(),
            display_name: details.requester_display_name.clone(),
            callback_token: details.callback_token.clone(),
            context_ids: details.context_ids.clone(),
        }
    }
}

/// Produces result text for a request.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    /// Processes one request.
    ///
    /// # Errors
    ///
    /// Any error consumes one unit of the request's retry budget.
    async fn process(&self, input: &ProcessingInput) -> Result<String, ProcessingError>;
}

impl std::fmt::Debug for dyn Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Processor")
    }
}

#[derive(Debug, Deserialize)]
struct UpstreamReply {
    content: String,
}

/// Processor that delegates to an HTTP service.
///
/// POSTs the [`ProcessingInput`] as JSON. A 2xx reply is read as
/// `{"content": "..."}` when it parses that way, otherwise the raw body is
/// used as the result.
#[derive(Debug, Clone)]
pub struct HttpProcessor {
    client: reqwest::Client,
    url: String,
}

impl HttpProcessor {
    /// Creates a processor posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns `ProcessingError::Failed` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ProcessingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProcessingError::failed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl Processor for HttpProcessor {
    async fn process(&self, input: &ProcessingInput) -> Result<String, ProcessingError> {
        let response = self
            .client
            .post(&self.url)
            .json(input)
            .send()
            .await
            .map_err(|e| ProcessingError::failed(format!("upstream request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProcessingError::upstream(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProcessingError::failed(format!("failed to read upstream reply: {e}")))?;

        let content = match serde_json::from_str::<UpstreamReply>(&body) {
            Ok(reply) => reply.content,
            Err(_) => body,
        };

        if content.trim().is_empty() {
            return Err(ProcessingError::failed("upstream returned empty content"));
        }

        debug!(chars = content.chars().count(), "upstream processing finished");
        Ok(content)
    }
}
