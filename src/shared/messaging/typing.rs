//! Typing Signals
//!
//! Ephemeral "counterpart is typing" events. They travel over a
//! broadcast-only channel and are never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload published on a conversation's typing channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingPayload {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub is_typing: bool,
}

/// Typing event as observed by this client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingSignal {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub is_typing: bool,
    /// Local receipt time
    pub received_at: DateTime<Utc>,
}

impl TypingSignal {
    /// Stamp a received payload
    pub fn received(payload: TypingPayload) -> Self {
        Self {
            conversation_id: payload.conversation_id,
            user_id: payload.user_id,
            is_typing: payload.is_typing,
            received_at: Utc::now(),
        }
    }
}

/// Broadcast topic for a conversation's typing channel
pub fn typing_topic(conversation_id: Uuid) -> String {
    format!("typing:{}", conversation_id)
}

/// Topic for a conversation's message insert channel
pub fn messages_topic(conversation_id: Uuid) -> String {
    format!("messages:{}", conversation_id)
}
