//! # Retry Logic and Backoff Strategies
//!
//! Bounded retry decisions for queued sends and exponential backoff for
//! realtime resubscription.
//!
//! ## Features
//!
//! - **Max Attempts**: A queued send is attempted at most `max_attempts` times
//! - **Permanent Failures**: Optionally fail backend rejections immediately
//! - **Exponential Backoff**: Resubscribe delays double up to a ceiling
//!
//! ## Usage
//!
//! ```rust
//! use sponsorlink::client::offline::retry::{RetryDecision, RetryPolicy};
//! use sponsorlink::shared::SendError;
//!
//! let policy = RetryPolicy::default();
//! let error = SendError::transient("timeout");
//! assert_eq!(policy.decide(1, &error), RetryDecision::Retry);
//! assert_eq!(policy.decide(3, &error), RetryDecision::GiveUp);
//! ```

use crate::shared::config::{AppConfig, PermanentFailurePolicy, DEFAULT_MAX_SEND_ATTEMPTS};
use crate::shared::error::SendError;
use std::time::Duration;

/// What to do with an operation after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Keep it queued for the next flush
    Retry,
    /// Remove it and surface a terminal failure
    GiveUp,
}

/// Retry policy for queued sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total send attempts allowed per operation
    pub max_attempts: u32,
    /// Treatment of rejections that can never succeed
    pub permanent_failures: PermanentFailurePolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_SEND_ATTEMPTS,
            permanent_failures: PermanentFailurePolicy::ConsumeRetries,
        }
    }
}

impl RetryPolicy {
    /// Policy described by the application config
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.max_send_attempts,
            permanent_failures: config.permanent_failure_policy,
        }
    }

    /// Decide after a failure; `failed_attempts` already includes this one
    pub fn decide(&self, failed_attempts: u32, error: &SendError) -> RetryDecision {
        if self.permanent_failures == PermanentFailurePolicy::FailImmediately && error.is_permanent() {
            return RetryDecision::GiveUp;
        }
        if failed_attempts >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry
        }
    }
}

/// Exponential backoff between resubscribe attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Backoff range from the application config
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.reconnect_initial_delay, config.reconnect_max_delay)
    }

    /// Delay to wait now; the following one doubles, capped at `max`
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);
        delay
    }

    /// Back to the initial delay after a successful subscribe
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
