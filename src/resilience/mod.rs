//! # Resilience Module
//!
//! Delay and retry decisions shared by channel recovery and message republishing.
//!
//! - **Backoff**: Fibonacci delays indexed by attempt, capped at a maximum
//! - **Retry**: bounded or unbounded total-attempt budget per message
//!
//! ## Usage
//!
//! ```rust
//! use confirmed_publisher::resilience::{BackoffPolicy, RetryDecision, RetryPolicy};
//! use std::time::Duration;
//!
//! let backoff = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30));
//! let policy = RetryPolicy::new(3, backoff);
//!
//! assert!(matches!(policy.decide(1), RetryDecision::Retry { next_attempt: 2, .. }));
//! assert_eq!(policy.decide(3), RetryDecision::Exhausted);
//! ```

pub mod backoff;
pub mod retry;

pub use backoff::BackoffPolicy;
pub use retry::{RetryDecision, RetryPolicy};
