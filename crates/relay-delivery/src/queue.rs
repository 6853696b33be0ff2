//! Bounded FIFO of pending requests.
//!
//! Backpressure is by rejection: a full queue refuses new work immediately
//! instead of blocking the submitter. Retries re-enter at the back and wait
//! for space instead, since dropping them would silently lose a request.

use std::{sync::Arc, time::Duration};

use relay_core::InteractionRequest;
use tokio::sync::{
    mpsc::{self, error::TrySendError, Permit},
    Mutex,
};

/// Outcome of trying to reserve a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveError {
    /// No capacity left.
    Full,
    /// Every receiver is gone.
    Closed,
}

/// Reserved slot; sending through it cannot fail.
#[derive(Debug)]
pub struct QueueSlot<'a> {
    permit: Permit<'a, InteractionRequest>,
}

impl QueueSlot<'_> {
    /// Enqueues the request into the reserved slot.
    pub fn send(self, request: InteractionRequest) {
        self.permit.send(request);
    }
}

/// Multi-producer, multi-consumer bounded queue.
///
/// Workers share the receiving half behind a mutex and only hold it while
/// waiting for the next request.
#[derive(Debug, Clone)]
pub struct RequestQueue {
    tx: mpsc::Sender<InteractionRequest>,
    rx: Arc<Mutex<mpsc::Receiver<InteractionRequest>>>,
}

impl RequestQueue {
    /// Creates a queue holding at most `capacity` requests.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self { tx, rx: Arc::new(Mutex::new(rx)) }
    }

    /// Reserves a slot without building anything.
    ///
    /// # Errors
    ///
    /// Returns `ReserveError::Full` at capacity.
    pub fn reserve(&self) -> Result<QueueSlot<'_>, ReserveError> {
        self.tx.try_reserve().map(|permit| QueueSlot { permit }).map_err(|e| match e {
            TrySendError::Full(()) => ReserveError::Full,
            TrySendError::Closed(()) => ReserveError::Closed,
        })
    }

    /// Enqueues `request` if there is room. Returns false when full.
    pub fn submit(&self, request: InteractionRequest) -> bool {
        self.tx.try_send(request).is_ok()
    }

    /// Enqueues a retried request, waiting for room if necessary.
    ///
    /// # Errors
    ///
    /// Hands the request back if the queue is closed.
    pub async fn requeue(&self, request: InteractionRequest) -> Result<(), InteractionRequest> {
        self.tx.send(request).await.map_err(|e| e.0)
    }

    /// Waits up to `poll_interval` for the next request.
    pub async fn next(&self, poll_interval: Duration) -> Option<InteractionRequest> {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(poll_interval, rx.recv()).await.ok().flatten()
    }

    /// Requests currently waiting.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Returns true if no request is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of waiting requests.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use relay_core::RequestDetails;

    use super::*;

    fn request(token: &str) -> InteractionRequest {
        let details = RequestDetails {
            callback_token: token.to_string(),
            origin_id: "app".to_string(),
            requester_id: "user".to_string(),
            ..RequestDetails::default()
        };
        InteractionRequest::new(details, 3, SystemTime::UNIX_EPOCH).unwrap()
    }

    #[tokio::test]
    async fn rejects_when_full_and_keeps_fifo_order() {
        let queue = RequestQueue::new(2);
        assert!(queue.submit(request("a")));
        assert!(queue.submit(request("b")));
        assert!(!queue.submit(request("c")));
        assert_eq!(queue.len(), 2);

        let first = queue.next(Duration::from_millis(10)).await.unwrap();
        let second = queue.next(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.details().callback_token, "a");
        assert_eq!(second.details().callback_token, "b");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn reserve_fails_fast_at_capacity() {
        let queue = RequestQueue::new(1);
        let slot = queue.reserve().unwrap();
        assert_eq!(queue.reserve().unwrap_err(), ReserveError::Full);
        slot.send(request("a"));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn dropped_slot_frees_capacity() {
        let queue = RequestQueue::new(1);
        drop(queue.reserve().unwrap());
        assert!(queue.reserve().is_ok());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn next_times_out_on_empty_queue() {
        let queue = RequestQueue::new(1);
        assert!(queue.next(Duration::from_millis(5)).await.is_none());
    }

    #[tokio::test]
    async fn requeue_appends_at_back() {
        let queue = RequestQueue::new(3);
        assert!(queue.submit(request("a")));
        queue.requeue(request("retry")).await.unwrap();
        let first = queue.next(Duration::from_millis(5)).await.unwrap();
        assert_eq!(first.details().callback_token, "a");
        assert_eq!(
            queue.next(Duration::from_millis(5)).await.unwrap().details().callback_token,
            "retry"
        );
    }
}
