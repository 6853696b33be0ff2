//! Error types for submission, processing and callback delivery.
//!
//! Delivery errors carry enough context to log a useful line and to decide
//! whether the failure should consume a unit of the request's retry budget.
//! Rate limiting is absorbed inside a single delivery call, so it only
//! surfaces here once the per-call wait cap is exceeded.

use std::{fmt, time::Duration};

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Failure of an outbound callback delivery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The callback endpoint did not answer within the request timeout.
    #[error("request timeout after {timeout:?}")]
    Timeout {
        /// Configured timeout
        timeout: Duration,
    },

    /// Too many 429 responses within one delivery call.
    #[error("rate limited {waits} times, giving up after last retry-after of {last_retry_after:?}")]
    RateLimited {
        /// Number of rate-limit waits already performed
        waits: u32,
        /// Retry-After of the last 429 response
        last_retry_after: Duration,
    },

    /// The endpoint answered with a status other than 200 or 429.
    #[error("unexpected HTTP status {status_code}")]
    HttpStatus {
        /// Response status code
        status_code: u16,
        /// Response body, possibly truncated
        body: String,
    },

    /// Connection or transport level failure.
    #[error("network error: {message}")]
    Network {
        /// Transport error description
        message: String,
    },

    /// Every allowed attempt of a delivery call failed.
    #[error("delivery failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// HTTP attempts made, excluding rate-limited ones
        attempts: u32,
        /// Description of the final failure
        last_error: String,
    },

    /// Invalid client configuration.
    #[error("invalid delivery configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Workers did not stop within the shutdown timeout.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Timeout that was exceeded
        timeout: Duration,
    },
}

impl DeliveryError {
    /// Creates a timeout error.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout }
    }

    /// Creates a rate limit error.
    pub fn rate_limited(waits: u32, last_retry_after: Duration) -> Self {
        Self::RateLimited { waits, last_retry_after }
    }

    /// Creates an unexpected-status error.
    pub fn http_status(status_code: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus { status_code, body: body.into() }
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a retries exhausted error wrapping the last failure.
    pub fn retries_exhausted(attempts: u32, last_error: &Self) -> Self {
        Self::RetriesExhausted { attempts, last_error: last_error.to_string() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Short category name used as a log field.
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from(self)
    }
}

/// Coarse grouping of attempt failures for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The processor failed or panicked.
    Processing,
    /// Timeouts and transport failures.
    Network,
    /// Non-success HTTP responses.
    Http,
    /// Rate limiting.
    RateLimit,
    /// Attempts exhausted inside one call.
    Exhausted,
    /// Configuration and lifecycle problems.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::Timeout { .. } | DeliveryError::Network { .. } => Self::Network,
            DeliveryError::HttpStatus { .. } => Self::Http,
            DeliveryError::RateLimited { .. } => Self::RateLimit,
            DeliveryError::RetriesExhausted { .. } => Self::Exhausted,
            DeliveryError::Configuration { .. } | DeliveryError::ShutdownTimeout { .. } => {
                Self::Internal
            },
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing => write!(f, "processing"),
            Self::Network => write!(f, "network"),
            Self::Http => write!(f, "http"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Failure of the processor that produces the result text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessingError {
    /// The processor reported a failure.
    #[error("processing failed: {message}")]
    Failed {
        /// Processor supplied reason
        message: String,
    },

    /// The upstream processing service answered with a non-success status.
    #[error("processing upstream returned HTTP {status_code}")]
    Upstream {
        /// Response status code
        status_code: u16,
    },

    /// The processor panicked; the panic was contained to this request.
    #[error("processing panicked: {message}")]
    Panicked {
        /// Panic payload, if it was a string
        message: String,
    },
}

impl ProcessingError {
    /// Creates a generic processing failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed { message: message.into() }
    }

    /// Creates an upstream status failure.
    pub fn upstream(status_code: u16) -> Self {
        Self::Upstream { status_code }
    }

    /// Creates a contained panic failure.
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::Panicked { message: message.into() }
    }
}

/// Why a single processing attempt of a request failed.
///
/// Every variant consumes one unit of the request's retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    /// The processor failed or panicked; its output, if any, is discarded.
    #[error(transparent)]
    Processing(#[from] ProcessingError),

    /// The result could not be delivered.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

impl AttemptError {
    /// Short category name used as a log field.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Processing(_) => ErrorCategory::Processing,
            Self::Delivery(e) => e.category(),
        }
    }
}

/// Rejection at the submission boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The queue is at capacity; nothing was enqueued.
    #[error("request queue is full (capacity {capacity})")]
    QueueFull {
        /// Queue capacity
        capacity: usize,
    },

    /// The inbound payload lacks a required field.
    #[error("malformed interaction: {reason}")]
    Malformed {
        /// What was missing or invalid
        reason: String,
    },

    /// The engine is not accepting work.
    #[error("relay is shutting down")]
    ShuttingDown,
}

impl SubmitError {
    /// Creates a malformed-payload error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed { reason: reason.into() }
    }
}
