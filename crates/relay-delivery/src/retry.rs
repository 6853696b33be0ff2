//! Table-driven backoff delays.
//!
//! The same policy type drives the waits between HTTP attempts inside one
//! delivery call and the waits between request-level retries.

use std::time::Duration;

/// Default backoff table in seconds.
pub const DEFAULT_RETRY_DELAYS_SECS: [u64; 4] = [1, 2, 5, 10];

/// Ordered table of retry delays.
///
/// `delay_for(i)` returns entry `i`, clamped to the last entry for larger
/// indices. An empty table yields no delay at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    /// Creates a policy from an explicit table.
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Creates a policy from whole seconds.
    pub fn from_secs(delays: &[u64]) -> Self {
        Self::new(delays.iter().copied().map(Duration::from_secs).collect())
    }

    /// A policy that never waits. Useful for tests.
    pub fn immediate() -> Self {
        Self::new(Vec::new())
    }

    /// Delay before retry number `index` (zero-based).
    pub fn delay_for(&self, index: u32) -> Duration {
        let Some(last) = self.delays.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        let index = usize::try_from(index).unwrap_or(usize::MAX).min(last);
        self.delays[index]
    }

    /// The configured table.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Returns true if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }

    /// Sum of the first `retries` delays, the minimum wait before giving up.
    pub fn total_for(&self, retries: u32) -> Duration {
        (0..retries).map(|i| self.delay_for(i)).sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_secs(&DEFAULT_RETRY_DELAYS_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_is_one_two_five_ten() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..6).map(|i| policy.delay_for(i).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 5, 10, 10, 10]);
    }

    #[test]
    fn empty_table_never_waits() {
        let policy = RetryPolicy::immediate();
        assert!(policy.is_empty());
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(u32::MAX), Duration::ZERO);
    }

    #[test]
    fn total_for_sums_clamped_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.total_for(3), Duration::from_secs(8));
        assert_eq!(policy.total_for(6), Duration::from_secs(38));
        assert_eq!(policy.total_for(0), Duration::ZERO);
    }
}
