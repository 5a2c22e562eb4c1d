//! Messaging Module
//!
//! This module contains the data structures exchanged by the messaging core:
//!
//! - `Message` - One chat turn, provisional or server-confirmed
//! - `MessageId` / `MessageStatus` - Identity and lifecycle of a message
//! - `NewMessage` - Insert request for the persistence collaborator
//! - `TypingSignal` / `TypingPayload` - Ephemeral typing events
//!
//! # Usage
//!
//! ```rust
//! use sponsorlink::shared::messaging::{Message, MessageId, MessageStatus};
//! ```

pub mod message;
pub mod typing;

// Re-export all types
pub use message::{validate_body, Message, MessageId, MessageStatus, NewMessage};
pub use typing::{messages_topic, typing_topic, TypingPayload, TypingSignal};
