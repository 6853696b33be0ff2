//! Error types for request construction and lifecycle transitions.

use thiserror::Error;

use crate::models::RequestStatus;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for domain operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A lifecycle transition that the state machine does not allow.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Status the request was in
        from: RequestStatus,
        /// Status that was requested
        to: RequestStatus,
    },

    /// A required field was absent or empty.
    #[error("missing required field: {field}")]
    MissingField {
        /// Name of the missing field
        field: &'static str,
    },

    /// A retry was requested but the budget is spent.
    #[error("retry budget exhausted after {max_retries} retries")]
    RetryBudgetExhausted {
        /// Budget fixed at submission
        max_retries: u32,
    },
}

impl CoreError {
    /// Creates a missing field error.
    pub fn missing(field: &'static str) -> Self {
        Self::MissingField { field }
    }
}
