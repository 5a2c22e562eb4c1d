//! Conversation Event Stream
//!
//! Everything that can change an open conversation's view arrives as a
//! [`ConversationEvent`]: the history page fetched on open, server rows
//! pushed by the realtime channel, and typing signals. The reconciliation
//! layer consumes one stream of these instead of three callback APIs.

use crate::shared::messaging::{Message, TypingSignal};

/// Input to a conversation's reconciliation loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    /// A page of persisted history
    History(Vec<Message>),
    /// A row inserted on the server, pushed in real time
    Message(Message),
    /// Counterpart started or stopped typing
    Typing(TypingSignal),
}

impl ConversationEvent {
    /// Short label for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ConversationEvent::History(_) => "history",
            ConversationEvent::Message(_) => "message",
            ConversationEvent::Typing(_) => "typing",
        }
    }
}
