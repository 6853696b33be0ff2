//! Recently seen requests and their lifecycle state.

use std::{
    collections::HashMap,
    time::{Duration, SystemTime},
};

use chrono::{DateTime, Utc};
use relay_core::{InteractionRequest, RequestId, RequestKey, RequestStatus};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

/// Point-in-time view of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Request identifier.
    pub request_id: RequestId,
    /// Lifecycle status.
    pub status: RequestStatus,
    /// Retries consumed.
    pub retry_count: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// When the request was submitted.
    pub submitted_at: DateTime<Utc>,
    /// When this entry last changed.
    pub updated_at: DateTime<Utc>,
}

/// Concurrent map from [`RequestKey`] to the latest known status.
///
/// A later request with the same key replaces the earlier entry.
#[derive(Debug, Default)]
pub struct StatusRegistry {
    entries: RwLock<HashMap<RequestKey, StatusSnapshot>>,
}

impl StatusRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the current state of `request`.
    pub async fn record(&self, request: &InteractionRequest, now: SystemTime) {
        let snapshot = StatusSnapshot {
            request_id: request.id(),
            status: request.status(),
            retry_count: request.retry_count(),
            max_retries: request.max_retries(),
            submitted_at: request.submitted_at().into(),
            updated_at: now.into(),
        };
        self.entries.write().await.insert(request.key(), snapshot);
    }

    /// Latest snapshot for `key`.
    pub async fn get(&self, key: &RequestKey) -> Option<StatusSnapshot> {
        self.entries.read().await.get(key).cloned()
    }

    /// Number of tracked requests.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if nothing is tracked.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Removes terminal entries last updated more than `retention` ago.
    ///
    /// Non-terminal entries are never purged. Returns the number removed.
    pub async fn purge_terminal(&self, retention: Duration, now: SystemTime) -> usize {
        let Some(cutoff) = now.checked_sub(retention) else {
            return 0;
        };
        let cutoff: DateTime<Utc> = cutoff.into();

        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, s| !(s.status.is_terminal() && s.updated_at < cutoff));
        let removed = before - entries.len();

        if removed > 0 {
            debug!(removed, remaining = entries.len(), "purged finished request statuses");
        }
        removed
    }
}
