//! Shared Error Types
//!
//! This module defines the error taxonomy used across the messaging core.
//! Every failure that crosses a component boundary is one of these closed
//! enums; collaborator implementations translate their own failures into
//! them before returning.
//!
//! # Error Categories
//!
//! - `SharedError` - Local validation and serialization failures
//! - `SendError` - Outcome of a send, history fetch or receipt update
//! - `ChannelError` - Realtime subscription failures (logged, never shown)
//! - `StorageError` - Durable local storage failures
//!
//! # Usage
//!
//! ```rust
//! use sponsorlink::shared::error::SendError;
//!
//! let error = SendError::backend(403, "row-level security rejected insert");
//! assert!(!error.is_transient());
//! ```
use thiserror::Error;

/// Shared error types for local validation and serialization
#[derive(Debug, Error, Clone)]
pub enum SharedError {
    /// JSON serialization or deserialization error
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Human-readable error message
        message: String,
    },

    /// Data validation error
    #[error("Validation error in field '{field}': {message}")]
    ValidationError {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },
}

impl SharedError {
    /// Create a new serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for SharedError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}

/// Failure of a message send or of any other backend round trip.
///
/// This is the only error shape the offline queue and the reconciliation
/// layer reason about. Collaborators map their transport-specific errors
/// onto one of the four variants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Bad input detected locally, before any I/O. Never queued or retried.
    #[error("Validation error in field '{field}': {message}")]
    Validation {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },

    /// No active session.
    #[error("Not authenticated")]
    Unauthenticated,

    /// Remote rejection (permission, malformed request, server fault).
    #[error("Backend rejected request ({code}): {message}")]
    Backend {
        /// Status code reported by the backend
        code: u16,
        /// Human-readable error message
        message: String,
    },

    /// Timeout or unreachable backend.
    #[error("Network error: {message}")]
    Transient {
        /// Human-readable error message
        message: String,
    },
}

impl SendError {
    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a backend rejection with a status code
    pub fn backend(code: u16, message: impl Into<String>) -> Self {
        Self::Backend {
            code,
            message: message.into(),
        }
    }

    /// Create a transient network error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Whether the failure is a connectivity problem.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Whether retrying the same request can never succeed.
    ///
    /// Backend 4xx codes count as permanent except request timeout (408)
    /// and rate limiting (429).
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Validation { .. } | Self::Unauthenticated => true,
            Self::Backend { code, .. } => (400..500).contains(code) && *code != 408 && *code != 429,
            Self::Transient { .. } => false,
        }
    }
}

impl From<SharedError> for SendError {
    fn from(err: SharedError) -> Self {
        match err {
            SharedError::ValidationError { field, message } => Self::Validation { field, message },
            SharedError::SerializationError { message } => Self::Backend { code: 422, message },
        }
    }
}

/// Realtime channel failure.
///
/// Channel errors are handled by resubscribing; they are logged and never
/// surfaced to the user.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Opening the subscription failed
    #[error("Subscribe failed on '{topic}': {message}")]
    Subscribe {
        /// Channel topic
        topic: String,
        /// Human-readable error message
        message: String,
    },

    /// An active subscription dropped
    #[error("Stream error on '{topic}': {message}")]
    Stream {
        /// Channel topic
        topic: String,
        /// Human-readable error message
        message: String,
    },

    /// Publishing an ephemeral event failed
    #[error("Publish failed on '{topic}': {message}")]
    Publish {
        /// Channel topic
        topic: String,
        /// Human-readable error message
        message: String,
    },

    /// The channel was already closed
    #[error("Channel '{0}' is closed")]
    Closed(String),
}

/// Durable local storage failure
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem error (creating the database directory)
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Persisted value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
