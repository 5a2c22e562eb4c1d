//! Property-based tests for retry bounds and reconnect backoff

use proptest::prelude::*;
use sponsorlink::client::offline::{Backoff, RetryDecision, RetryPolicy};
use sponsorlink::shared::{AppConfig, SendError};
use std::time::Duration;

proptest! {
    #[test]
    fn test_backoff_grows_to_cap(initial_ms in 1u64..2_000, cap_factor in 1u64..64, steps in 1usize..40) {
        let initial = Duration::from_millis(initial_ms);
        let max = initial * cap_factor as u32;
        let mut backoff = Backoff::new(initial, max);

        let mut previous = Duration::ZERO;
        for _ in 0..steps {
            let delay = backoff.next_delay();
            prop_assert!(delay >= previous);
            prop_assert!(delay <= max);
            previous = delay;
        }

        backoff.reset();
        prop_assert_eq!(backoff.next_delay(), initial);
    }

    #[test]
    fn test_transient_failures_retry_until_limit(max_attempts in 1u32..10, failed in 1u32..20) {
        let config = AppConfig::builder()
            .max_send_attempts(max_attempts)
            .build()
            .unwrap();
        let policy = RetryPolicy::from_config(&config);
        let decision = policy.decide(failed, &SendError::transient("timeout"));
        if failed >= max_attempts {
            prop_assert_eq!(decision, RetryDecision::GiveUp);
        } else {
            prop_assert_eq!(decision, RetryDecision::Retry);
        }
    }
}
