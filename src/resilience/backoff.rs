//! # Fibonacci Backoff
//!
//! Maps an attempt index to a delay. Used both for the pause before each
//! channel creation attempt and for the delay before a failed message is
//! republished. Index 0 is always immediate so the first channel is created
//! without waiting.

use std::time::Duration;

use crate::config::BackoffConfig;

/// Pure attempt-index → delay mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay())
    }

    /// No delay at all, for tests and tight loops
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Delay for the given attempt index: `fib(attempt) * base`, capped at the max delay
    pub fn delay(&self, attempt: u32) -> Duration {
        let units = fibonacci(attempt);
        let units = u32::try_from(units).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(units)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

/// fib(0) = 0, fib(1) = 1, fib(2) = 1, fib(3) = 2, ... saturating at u64::MAX
fn fibonacci(n: u32) -> u64 {
    let (mut current, mut next) = (0u64, 1u64);
    for _ in 0..n {
        let sum = current.saturating_add(next);
        current = next;
        next = sum;
        if current == u64::MAX {
            break;
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_sequence() {
        let expected = [0, 1, 1, 2, 3, 5, 8, 13, 21, 34];
        for (n, value) in expected.iter().enumerate() {
            assert_eq!(fibonacci(n as u32), *value);
        }
    }

    #[test]
    fn test_first_attempt_is_immediate() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(4), Duration::from_secs(3));
        assert_eq!(policy.delay(6), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(policy.delay(7), Duration::from_secs(10));
        assert_eq!(policy.delay(500), Duration::from_secs(10));
    }

    #[test]
    fn test_immediate_policy() {
        let policy = BackoffPolicy::immediate();
        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(30), Duration::ZERO);
    }
}
