//! Application configuration module
//!
//! Provides the tunables of the messaging core. Values are assembled with
//! [`AppConfigBuilder`] and checked by [`AppConfig::validate`].

use std::time::Duration;
use thiserror::Error;

/// Default maximum message body length, in characters
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 2000;

/// Default number of send attempts before a queued message fails for good
pub const DEFAULT_MAX_SEND_ATTEMPTS: u32 = 3;

/// Default lifetime of a typing indicator without a follow-up event
pub const DEFAULT_TYPING_DECAY: Duration = Duration::from_secs(3);

/// Default history page fetched when a conversation opens
pub const DEFAULT_HISTORY_PAGE_SIZE: u32 = 50;

/// Storage key holding the serialized offline queue
pub const DEFAULT_QUEUE_STORAGE_KEY: &str = "offline_message_queue";

/// How backend rejections that can never succeed are treated by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermanentFailurePolicy {
    /// Permanent rejections consume the retry budget like any other failure
    #[default]
    ConsumeRetries,
    /// Permanent rejections fail the operation on the first attempt
    FailImmediately,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Maximum message body length in characters
    pub max_message_len: usize,
    /// Send attempts before a queued operation is marked failed
    pub max_send_attempts: u32,
    /// Retry treatment of permanent backend rejections
    pub permanent_failure_policy: PermanentFailurePolicy,
    /// Typing indicator lifetime
    pub typing_decay: Duration,
    /// Messages fetched when a conversation opens
    pub history_page_size: u32,
    /// Key under which the offline queue is persisted
    pub queue_storage_key: String,
    /// Characters kept in the last-message preview
    pub preview_len: usize,
    /// First realtime resubscribe delay
    pub reconnect_initial_delay: Duration,
    /// Upper bound for the realtime resubscribe delay
    pub reconnect_max_delay: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            max_send_attempts: DEFAULT_MAX_SEND_ATTEMPTS,
            permanent_failure_policy: PermanentFailurePolicy::default(),
            typing_decay: DEFAULT_TYPING_DECAY,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            queue_storage_key: DEFAULT_QUEUE_STORAGE_KEY.to_string(),
            preview_len: 80,
            reconnect_initial_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
        }
    }
}

impl AppConfig {
    /// Create a new AppConfigBuilder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_len == 0 {
            return Err(ConfigError::OutOfRange("max_message_len"));
        }
        if self.max_send_attempts == 0 {
            return Err(ConfigError::OutOfRange("max_send_attempts"));
        }
        if self.history_page_size == 0 {
            return Err(ConfigError::OutOfRange("history_page_size"));
        }
        if self.preview_len < 4 {
            return Err(ConfigError::OutOfRange("preview_len"));
        }
        if self.queue_storage_key.trim().is_empty() {
            return Err(ConfigError::MissingValue("queue_storage_key"));
        }
        if self.reconnect_initial_delay.is_zero()
            || self.reconnect_initial_delay > self.reconnect_max_delay
        {
            return Err(ConfigError::InvalidBackoff {
                initial: self.reconnect_initial_delay,
                max: self.reconnect_max_delay,
            });
        }
        Ok(())
    }
}

/// Builder for AppConfig
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    /// Set the maximum message length
    pub fn max_message_len(mut self, len: usize) -> Self {
        self.config.max_message_len = len;
        self
    }

    /// Set the number of send attempts per queued operation
    pub fn max_send_attempts(mut self, attempts: u32) -> Self {
        self.config.max_send_attempts = attempts;
        self
    }

    /// Set the permanent failure policy
    pub fn permanent_failure_policy(mut self, policy: PermanentFailurePolicy) -> Self {
        self.config.permanent_failure_policy = policy;
        self
    }

    /// Set the typing indicator lifetime
    pub fn typing_decay(mut self, decay: Duration) -> Self {
        self.config.typing_decay = decay;
        self
    }

    /// Set the history page size
    pub fn history_page_size(mut self, size: u32) -> Self {
        self.config.history_page_size = size;
        self
    }

    /// Set the queue storage key
    pub fn queue_storage_key(mut self, key: impl Into<String>) -> Self {
        self.config.queue_storage_key = key.into();
        self
    }

    /// Set the preview length
    pub fn preview_len(mut self, len: usize) -> Self {
        self.config.preview_len = len;
        self
    }

    /// Set the resubscribe backoff range
    pub fn reconnect_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.config.reconnect_initial_delay = initial;
        self.config.reconnect_max_delay = max;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("value out of range: {0}")]
    OutOfRange(&'static str),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error("invalid reconnect backoff: initial {initial:?} exceeds max {max:?}")]
    InvalidBackoff { initial: Duration, max: Duration },
}
