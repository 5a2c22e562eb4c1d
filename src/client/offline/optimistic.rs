//! # Optimistic UI Updates
//!
//! Provisional bubbles shown the moment a message is submitted, and the rules
//! deciding what happens to them when the send does not go through.
//!
//! ## Features
//!
//! - **Immediate UI Updates**: The bubble exists before any I/O starts
//! - **Failure Routing**: Transient failures fall back to the offline queue,
//!   backend rejections roll the bubble back into the composer
//! - **Reseeding**: Queued or failed operations from an earlier session come
//!   back as bubbles when their conversation is reopened

use crate::client::offline::queue::QueuedOperation;
use crate::shared::error::SendError;
use crate::shared::messaging::{Message, MessageId, MessageStatus};
use uuid::Uuid;

/// Result of submitting a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Persisted; the bubble now shows the server row
    Sent(Message),
    /// Handed to the offline queue; the bubble shows `Queued`
    Queued(MessageId),
    /// Rejected; the bubble is gone and its text is back in the draft
    RolledBack { draft: String, error: SendError },
}

/// What to do with a bubble whose online send failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureRoute {
    /// Keep the bubble and let the offline queue retry it
    Queue,
    /// Remove the bubble and restore the draft
    Rollback,
    /// Roll back and return the error to the caller
    Propagate,
}

impl FailureRoute {
    pub fn for_error(error: &SendError) -> Self {
        match error {
            SendError::Transient { .. } => FailureRoute::Queue,
            SendError::Backend { .. } | SendError::Validation { .. } => FailureRoute::Rollback,
            SendError::Unauthenticated => FailureRoute::Propagate,
        }
    }
}

/// Bubble for a message about to be sent or queued
pub fn provisional_bubble(
    operation_id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    recipient_id: Uuid,
    body: &str,
    online: bool,
) -> Message {
    let status = if online {
        MessageStatus::Sending
    } else {
        MessageStatus::Queued
    };
    Message::provisional(
        operation_id,
        conversation_id,
        sender_id,
        recipient_id,
        body.to_string(),
        status,
    )
}

/// Bubble restored from an operation of an earlier session
pub fn reseeded_bubble(operation: &QueuedOperation, sender_id: Uuid, status: MessageStatus) -> Message {
    let mut bubble = Message::provisional(
        operation.id,
        operation.conversation_id,
        sender_id,
        operation.recipient_id,
        operation.body.clone(),
        status,
    );
    bubble.created_at = operation.enqueued_at;
    bubble
}
