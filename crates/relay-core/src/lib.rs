//! Core domain models for the deferred callback relay.
//!
//! Provides the strongly-typed interaction request, its lifecycle state
//! machine, and the clock abstraction shared by every other crate. The
//! request is the unit of work that flows from the submission boundary
//! through the queue, the worker pool and finally the delivery client.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    ContextIds, InteractionRequest, RequestDetails, RequestId, RequestKey, RequestStatus,
};
pub use time::{unix_millis, Clock, RealClock, Sleep, TestClock};
