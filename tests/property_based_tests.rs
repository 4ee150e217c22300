use confirmed_publisher::messaging::SequenceTranslator;
use confirmed_publisher::resilience::{BackoffPolicy, RetryDecision, RetryPolicy};
use proptest::prelude::*;
use std::time::Duration;

/// Publishes per channel generation; each generation restarts local numbering at 1
fn generations_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..20, 1..8)
}

proptest! {
    /// Property: internal sequence numbers strictly increase across channel generations
    #[test]
    fn internal_sequence_numbers_strictly_increase(generations in generations_strategy()) {
        let mut translator = SequenceTranslator::new();
        let mut last_issued = 0u64;
        let mut last_offset = 0u64;

        for publishes in generations {
            for local in 1..=publishes {
                let internal = translator.allocate(local);
                prop_assert!(internal > last_issued, "{} not above {}", internal, last_issued);
                last_issued = internal;
            }
            translator.advance_offset();
            prop_assert!(translator.offset() >= last_offset);
            prop_assert_eq!(translator.offset(), last_issued);
            last_offset = translator.offset();
        }
    }

    /// Property: a cumulative confirm only resolves keys of the current generation up to its target
    #[test]
    fn cumulative_confirm_stays_within_generation(
        old_generation in 1u64..30,
        new_publishes in 1u64..30,
        tag_choice in any::<prop::sample::Index>(),
    ) {
        let mut translator = SequenceTranslator::new();
        for local in 1..=old_generation {
            translator.allocate(local);
        }
        translator.advance_offset();
        let pending: Vec<u64> = (1..=new_publishes)
            .map(|local| translator.allocate(local))
            .chain(1..=old_generation)
            .collect();

        let delivery_tag = tag_choice.index(new_publishes as usize) as u64 + 1;
        let target = translator.to_internal(delivery_tag);
        let resolved = translator.confirmed_tags(delivery_tag, true, pending);

        prop_assert_eq!(resolved.last().copied(), Some(target));
        prop_assert!(resolved.iter().all(|key| *key > old_generation && *key <= target));
        prop_assert_eq!(resolved.len() as u64, delivery_tag);
    }

    /// Property: backoff never shrinks with the attempt index and never exceeds its cap
    #[test]
    fn backoff_is_monotonic_and_capped(
        base_millis in 1u64..5_000,
        cap_factor in 1u64..100,
        attempts in 1u32..120,
    ) {
        let cap = Duration::from_millis(base_millis * cap_factor);
        let policy = BackoffPolicy::new(Duration::from_millis(base_millis), cap);

        prop_assert_eq!(policy.delay(0), Duration::ZERO);
        let mut previous = Duration::ZERO;
        for attempt in 0..attempts {
            let delay = policy.delay(attempt);
            prop_assert!(delay >= previous);
            prop_assert!(delay <= cap);
            previous = delay;
        }
    }

    /// Property: a positive retry budget of K allows exactly K attempts
    #[test]
    fn bounded_budget_allows_exactly_k_attempts(max_retries in 1i32..50) {
        let policy = RetryPolicy::new(max_retries, BackoffPolicy::immediate());
        let mut attempt = 1u32;
        while let RetryDecision::Retry { next_attempt, .. } = policy.decide(attempt) {
            prop_assert_eq!(next_attempt, attempt + 1);
            attempt = next_attempt;
        }
        prop_assert_eq!(attempt as i32, max_retries);
    }

    /// Property: a non-positive budget never exhausts
    #[test]
    fn unbounded_budget_never_exhausts(max_retries in -5i32..=0, attempt in 1u32..10_000) {
        let policy = RetryPolicy::new(max_retries, BackoffPolicy::immediate());
        let is_retry = matches!(policy.decide(attempt), RetryDecision::Retry { .. });
        prop_assert!(is_retry);
    }
}
