//! # Exponential Backoff
//!
//! Per-key exponential backoff used by the work queue when a sync fails.
//!
//! Each failure of a key doubles its delay, starting at the base delay and capped
//! at the maximum. A successful sync forgets the key and the next failure starts
//! over from the base delay.
//!
//! ## Usage
//!
//! ```rust
//! use registry_storage_operator::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff: ExponentialBackoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));
//! assert_eq!(backoff.next_backoff("changes"), Duration::from_millis(5));
//! assert_eq!(backoff.next_backoff("changes"), Duration::from_millis(10));
//! assert_eq!(backoff.next_backoff("changes"), Duration::from_millis(20));
//! backoff.forget("changes");
//! assert_eq!(backoff.next_backoff("changes"), Duration::from_millis(5));
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Exponential backoff calculator tracking failures per key
#[derive(Debug, Clone)]
pub struct ExponentialBackoff<K = String> {
    /// Delay after the first failure
    base: Duration,
    /// Upper bound on any delay
    max: Duration,
    /// Consecutive failures per key
    failures: HashMap<K, u32>,
}

impl<K: Eq + Hash + Clone> ExponentialBackoff<K> {
    /// Create a new backoff with the given base and maximum delays
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::new(),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying
    pub fn next_backoff<Q>(&mut self, key: &Q) -> Duration
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        let exponent = match self.failures.get_mut(key) {
            Some(count) => {
                let exponent = *count;
                *count = count.saturating_add(1);
                exponent
            }
            None => {
                self.failures.insert(key.to_owned(), 1);
                0
            }
        };

        // 2^31 overflows any realistic base; clamp before multiplying.
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Number of consecutive failures recorded for `key`
    pub fn failures<Q>(&self, key: &Q) -> u32
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.failures.get(key).copied().unwrap_or(0)
    }

    /// Reset the backoff for `key` after a successful sync
    pub fn forget<Q>(&mut self, key: &Q)
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.failures.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff: ExponentialBackoff =
            ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));

        assert_eq!(backoff.next_backoff("changes"), Duration::from_millis(5));
        assert_eq!(backoff.next_backoff("changes"), Duration::from_millis(10));
        assert_eq!(backoff.next_backoff("changes"), Duration::from_millis(20));
        assert_eq!(backoff.next_backoff("changes"), Duration::from_millis(40));
        assert_eq!(backoff.failures("changes"), 4);
    }

    #[test]
    fn test_exponential_backoff_max_cap() {
        let mut backoff: ExponentialBackoff =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(10));

        assert_eq!(backoff.next_backoff("k"), Duration::from_secs(1));
        assert_eq!(backoff.next_backoff("k"), Duration::from_secs(2));
        assert_eq!(backoff.next_backoff("k"), Duration::from_secs(4));
        assert_eq!(backoff.next_backoff("k"), Duration::from_secs(8));
        assert_eq!(backoff.next_backoff("k"), Duration::from_secs(10));
        // Should stay at max, even far past the point where 2^n overflows
        for _ in 0..64 {
            assert_eq!(backoff.next_backoff("k"), Duration::from_secs(10));
        }
    }

    #[test]
    fn test_exponential_backoff_forget() {
        let mut backoff: ExponentialBackoff =
            ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));

        backoff.next_backoff("changes");
        backoff.next_backoff("changes");
        backoff.forget("changes");

        assert_eq!(backoff.failures("changes"), 0);
        assert_eq!(backoff.next_backoff("changes"), Duration::from_millis(5));
    }

    #[test]
    fn test_exponential_backoff_per_key_state() {
        let mut backoff: ExponentialBackoff =
            ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));

        backoff.next_backoff("a");
        backoff.next_backoff("a");
        assert_eq!(backoff.next_backoff("b"), Duration::from_millis(5));
        assert_eq!(backoff.next_backoff("a"), Duration::from_millis(20));
    }
}
