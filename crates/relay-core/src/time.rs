//! Clock abstraction shared by the queue, delivery client and metrics.
//!
//! Every backoff wait and every metric timestamp goes through a `Clock`, so
//! tests can replace real waiting with virtual time and assert on the exact
//! sequence of waits that a delivery produced.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

/// Boxed future returned by [`Clock::sleep`].
pub type Sleep<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Source of time for the relay.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant, used for measuring durations.
    fn now(&self) -> Instant;

    /// Wall-clock time, used for submission and metric timestamps.
    fn now_system(&self) -> SystemTime;

    /// Waits for `duration`.
    fn sleep(&self, duration: Duration) -> Sleep<'_>;

    /// Elapsed time since `start`, saturating at zero.
    fn elapsed_since(&self, start: Instant) -> Duration {
        self.now().saturating_duration_since(start)
    }
}

/// Milliseconds since the UNIX epoch, zero for times before it.
pub fn unix_millis(time: SystemTime) -> u64 {
    let ms = time.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
    u64::try_from(ms).unwrap_or(u64::MAX)
}

/// Production clock backed by the system clock and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Sleep<'_> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Virtual clock for deterministic tests.
///
/// `sleep` advances time instantly and records the requested duration, so a
/// test can run a full backoff schedule in microseconds and then inspect
/// [`TestClock::sleeps`]. Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct TestClock {
    offset_ns: Arc<AtomicU64>,
    system_base_ns: Arc<AtomicU64>,
    base_instant: Instant,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl TestClock {
    /// Creates a clock whose wall time starts at the real current time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Creates a clock whose wall time starts at `start`.
    pub fn with_start_time(start: SystemTime) -> Self {
        let since_epoch = start.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            offset_ns: Arc::new(AtomicU64::new(0)),
            system_base_ns: Arc::new(AtomicU64::new(saturating_nanos(since_epoch))),
            base_instant: Instant::now(),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Moves both monotonic and wall time forward.
    pub fn advance(&self, duration: Duration) {
        self.offset_ns.fetch_add(saturating_nanos(duration), Ordering::AcqRel);
    }

    /// Total virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_ns.load(Ordering::Acquire))
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Sum of all recorded sleeps.
    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }

    /// Clears the sleep log without touching the current time.
    pub fn clear_sleeps(&self) {
        self.sleeps.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_system(&self) -> SystemTime {
        let base = self.system_base_ns.load(Ordering::Acquire);
        UNIX_EPOCH + Duration::from_nanos(base) + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> Sleep<'_> {
        self.sleeps.lock().unwrap_or_else(PoisonError::into_inner).push(duration);
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}
