//! Shared Module
//!
//! Types shared by every component of the messaging core and by the
//! collaborators that plug into it. Nothing in here performs I/O.

/// Message and typing data structures
pub mod messaging;

/// Conversation event stream
pub mod event;

/// Shared error types
pub mod error;

/// Application configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use config::{AppConfig, AppConfigBuilder, ConfigError, PermanentFailurePolicy};
pub use error::{ChannelError, SendError, SharedError, StorageError};
pub use event::ConversationEvent;
pub use messaging::{Message, MessageId, MessageStatus, NewMessage, TypingPayload, TypingSignal};
