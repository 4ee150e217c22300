//! # Message Retry Policy
//!
//! Decides what happens to a message whose attempt failed, regardless of why it
//! failed (broken channel, acquisition timeout, broker nack or confirm timeout).
//!
//! A configured `max_retries` of K yields K *total* attempts: the comparison is
//! `attempt < max_retries`, with attempts numbered from 1. Zero or negative
//! values never exhaust.

use std::time::Duration;

use super::BackoffPolicy;

/// Outcome of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Republish as `next_attempt` once `delay` has elapsed
    Retry { next_attempt: u32, delay: Duration },
    /// No attempts left; the failure is terminal
    Exhausted,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: i32,
    backoff: BackoffPolicy,
}

impl RetryPolicy {
    pub fn new(max_retries: i32, backoff: BackoffPolicy) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_retries <= 0
    }

    /// Decide the fate of a message whose attempt number `attempt` failed
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        let within_budget = i64::from(attempt) < i64::from(self.max_retries);
        if self.is_unbounded() || within_budget {
            RetryDecision::Retry {
                next_attempt: attempt.saturating_add(1),
                delay: self.backoff.delay(attempt),
            }
        } else {
            RetryDecision::Exhausted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seconds_policy(max_retries: i32) -> RetryPolicy {
        RetryPolicy::new(
            max_retries,
            BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(60)),
        )
    }

    #[test]
    fn test_max_retries_counts_total_attempts() {
        let policy = seconds_policy(2);
        assert_eq!(
            policy.decide(1),
            RetryDecision::Retry {
                next_attempt: 2,
                delay: Duration::from_secs(1),
            }
        );
        assert_eq!(policy.decide(2), RetryDecision::Exhausted);
    }

    #[test]
    fn test_single_attempt_never_retries() {
        assert_eq!(seconds_policy(1).decide(1), RetryDecision::Exhausted);
    }

    #[test]
    fn test_unbounded_never_exhausts() {
        let policy = seconds_policy(0);
        for attempt in [1, 2, 10, 1_000, u32::MAX - 1] {
            assert!(matches!(
                policy.decide(attempt),
                RetryDecision::Retry { .. }
            ));
        }
        assert!(seconds_policy(-3).is_unbounded());
    }

    #[test]
    fn test_delay_grows_with_attempt() {
        let policy = seconds_policy(0);
        let delays: Vec<Duration> = (1..=6)
            .map(|attempt| match policy.decide(attempt) {
                RetryDecision::Retry { delay, .. } => delay,
                RetryDecision::Exhausted => unreachable!(),
            })
            .collect();
        assert_eq!(
            delays,
            [1, 1, 2, 3, 5, 8].map(Duration::from_secs).to_vec()
        );
    }
}
