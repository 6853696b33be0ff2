//! Interaction requests and their lifecycle.
//!
//! An `InteractionRequest` is created once at the submission boundary and is
//! owned by exactly one holder at a time: the queue, a worker, or the retry
//! scheduler. Every status change goes through the methods on this type so
//! the state machine and the retry budget cannot be bypassed.

use std::{
    fmt,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Strongly-typed request identifier, assigned at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Creates a new random request ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lookup key for status introspection.
///
/// A callback token is only unique per requester in the upstream platform,
/// so both parts are needed to address a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    /// Opaque token identifying the callback destination.
    pub callback_token: String,
    /// Identifier of the user that triggered the interaction.
    pub requester_id: String,
}

impl RequestKey {
    /// Creates a key from its two parts.
    pub fn new(callback_token: impl Into<String>, requester_id: impl Into<String>) -> Self {
        Self { callback_token: callback_token.into(), requester_id: requester_id.into() }
    }
}

impl fmt::Display for RequestKey {
    // Callback tokens act as short-lived credentials; only a prefix is logged.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.callback_token.chars().take(8).collect();
        write!(f, "{prefix}..:{}", self.requester_id)
    }
}

/// Lifecycle status of an interaction request.
///
/// ```text
/// Pending ──▶ Processing ──▶ Completed
///    ▲            │
///    │            ├────────▶ Failed
///    │            ▼
///    └─────── Retrying
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Queued and waiting for a worker.
    Pending,

    /// A worker owns the request and is processing or delivering it.
    Processing,

    /// The last attempt failed; waiting for the backoff timer.
    Retrying,

    /// Result delivered. Terminal.
    Completed,

    /// Retry budget exhausted. Terminal.
    Failed,
}

impl RequestStatus {
    /// Returns true for states that never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true when `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed | Self::Retrying | Self::Failed)
                | (Self::Retrying, Self::Pending)
        )
    }

    /// Stable lowercase name, used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional grouping identifiers carried through to the processor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextIds {
    /// Top-level space (for example a guild or workspace).
    pub space_id: Option<String>,
    /// Channel or thread inside the space.
    pub subchannel_id: Option<String>,
}

/// Caller-supplied fields of a new request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestDetails {
    /// Opaque token identifying where to deliver the result.
    pub callback_token: String,
    /// Application or channel the result is delivered through.
    pub origin_id: String,
    /// User that triggered the interaction.
    pub requester_id: String,
    /// Display name of the requester.
    pub requester_display_name: String,
    /// Requester roles, in the order the platform reported them.
    pub roles: Vec<String>,
    /// Text to process.
    pub payload: String,
    /// Optional grouping identifiers.
    pub context_ids: ContextIds,
}

/// One unit of deferred work.
#[derive(Debug)]
pub struct InteractionRequest {
    id: RequestId,
    details: RequestDetails,
    submitted_at: SystemTime,
    retry_count: u32,
    max_retries: u32,
    status: RequestStatus,
}

impl InteractionRequest {
    /// Creates a pending request.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::MissingField` when the callback token, origin or
    /// requester is empty, since such a request could never be delivered.
    pub fn new(
        details: RequestDetails,
        max_retries: u32,
        submitted_at: SystemTime,
    ) -> Result<Self> {
        if details.callback_token.trim().is_empty() {
            return Err(CoreError::missing("callback_token"));
        }
        if details.origin_id.trim().is_empty() {
            return Err(CoreError::missing("origin_id"));
        }
        if details.requester_id.trim().is_empty() {
            return Err(CoreError::missing("requester_id"));
        }

        Ok(Self {
            id: RequestId::new(),
            details,
            submitted_at,
            retry_count: 0,
            max_retries,
            status: RequestStatus::Pending,
        })
    }

    /// Request identifier.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Status lookup key.
    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.details.callback_token, &self.details.requester_id)
    }

    /// Caller-supplied fields.
    pub fn details(&self) -> &RequestDetails {
        &self.details
    }

    /// Submission timestamp.
    pub fn submitted_at(&self) -> SystemTime {
        self.submitted_at
    }

    /// Time since submission, zero if the clock went backwards.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.submitted_at).unwrap_or_default()
    }

    /// Current status.
    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Retries consumed so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Retry budget fixed at submission.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns true while at least one more retry may be scheduled.
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Pending -> Processing, when a worker takes ownership.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTransition` unless the request is pending.
    pub fn begin_processing(&mut self) -> Result<()> {
        self.transition(RequestStatus::Processing)
    }

    /// Processing -> Completed.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTransition` unless the request is processing.
    pub fn complete(&mut self) -> Result<()> {
        self.transition(RequestStatus::Completed)
    }

    /// Records a failed attempt.
    ///
    /// Moves to `Retrying` while budget remains, otherwise to `Failed`.
    /// Returns the new status.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTransition` unless the request is processing.
    pub fn fail_attempt(&mut self) -> Result<RequestStatus> {
        let next =
            if self.has_retries_left() { RequestStatus::Retrying } else { RequestStatus::Failed };
        self.transition(next)?;
        Ok(next)
    }

    /// Retrying -> Pending once the backoff has elapsed, consuming one retry.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTransition` unless the request is retrying,
    /// and `CoreError::RetryBudgetExhausted` if no budget remains.
    pub fn requeue(&mut self) -> Result<()> {
        if !self.has_retries_left() {
            return Err(CoreError::RetryBudgetExhausted { max_retries: self.max_retries });
        }
        self.transition(RequestStatus::Pending)?;
        self.retry_count += 1;
        Ok(())
    }

    fn transition(&mut self, next: RequestStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition { from: self.status, to: next });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details() -> RequestDetails {
        RequestDetails {
            callback_token: "token-abcdefghijkl".to_string(),
            origin_id: "app-1".to_string(),
            requester_id: "user-1".to_string(),
            requester_display_name: "User".to_string(),
            roles: vec!["member".to_string()],
            payload: "hello".to_string(),
            context_ids: ContextIds::default(),
        }
    }

    fn request(max_retries: u32) -> InteractionRequest {
        InteractionRequest::new(details(), max_retries, SystemTime::UNIX_EPOCH).unwrap()
    }

    #[test]
    fn new_request_starts_pending_with_zero_retries() {
        let req = request(3);
        assert_eq!(req.status(), RequestStatus::Pending);
        assert_eq!(req.retry_count(), 0);
        assert_eq!(req.max_retries(), 3);
    }

    #[test]
    fn rejects_missing_identity_fields() {
        let mut d = details();
        d.callback_token = String::new();
        assert_eq!(
            InteractionRequest::new(d, 3, SystemTime::UNIX_EPOCH).unwrap_err(),
            CoreError::missing("callback_token")
        );

        let mut d = details();
        d.origin_id = "   ".to_string();
        assert_eq!(
            InteractionRequest::new(d, 3, SystemTime::UNIX_EPOCH).unwrap_err(),
            CoreError::missing("origin_id")
        );

        let mut d = details();
        d.requester_id = String::new();
        assert!(InteractionRequest::new(d, 3, SystemTime::UNIX_EPOCH).is_err());
    }

    #[test]
    fn happy_path_reaches_completed() {
        let mut req = request(3);
        req.begin_processing().unwrap();
        req.complete().unwrap();
        assert_eq!(req.status(), RequestStatus::Completed);
        assert!(req.status().is_terminal());
    }

    #[test]
    fn failures_consume_budget_then_fail() {
        let mut req = request(2);

        for expected_retry in 1..=2 {
            req.begin_processing().unwrap();
            assert_eq!(req.fail_attempt().unwrap(), RequestStatus::Retrying);
            req.requeue().unwrap();
            assert_eq!(req.retry_count(), expected_retry);
        }

        req.begin_processing().unwrap();
        assert_eq!(req.fail_attempt().unwrap(), RequestStatus::Failed);
        assert_eq!(req.retry_count(), req.max_retries());
    }

    #[test]
    fn zero_budget_fails_immediately() {
        let mut req = request(0);
        req.begin_processing().unwrap();
        assert_eq!(req.fail_attempt().unwrap(), RequestStatus::Failed);
    }

    #[test]
    fn terminal_states_never_transition() {
        let mut req = request(3);
        req.begin_processing().unwrap();
        req.complete().unwrap();

        assert!(req.begin_processing().is_err());
        assert!(req.fail_attempt().is_err());
        assert!(req.requeue().is_err());
        assert_eq!(req.status(), RequestStatus::Completed);
    }

    #[test]
    fn states_cannot_be_skipped() {
        let mut req = request(3);
        assert_eq!(
            req.complete().unwrap_err(),
            CoreError::InvalidTransition {
                from: RequestStatus::Pending,
                to: RequestStatus::Completed
            }
        );
        assert!(req.requeue().is_err());
    }

    #[test]
    fn key_display_hides_most_of_the_token() {
        let key = RequestKey::new("abcdefghijklmnop", "42");
        assert_eq!(key.to_string(), "abcdefgh..:42");
    }

    #[test]
    fn age_is_zero_when_clock_goes_backwards() {
        let req = InteractionRequest::new(
            details(),
            1,
            SystemTime::UNIX_EPOCH + Duration::from_secs(100),
        )
        .unwrap();
        assert_eq!(req.age(SystemTime::UNIX_EPOCH), Duration::ZERO);
        assert_eq!(
            req.age(SystemTime::UNIX_EPOCH + Duration::from_secs(130)),
            Duration::from_secs(30)
        );
    }
}
