//! # Collaborator Interfaces
//!
//! The messaging core talks to the outside world only through the traits in
//! this module. Authentication, the hosted tables, realtime fan-out, device
//! storage and push delivery are all implemented elsewhere; tests and the
//! demo use the in-process [`LoopbackBackend`](crate::backend::LoopbackBackend)
//! and [`MemoryStore`](crate::client::local_db::MemoryStore).

use crate::shared::error::{ChannelError, SendError, StorageError};
use crate::shared::messaging::{Message, MessageId, NewMessage, TypingPayload};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use uuid::Uuid;

/// Stream of server rows inserted into one conversation
pub type InsertStream = BoxStream<'static, Result<Message, ChannelError>>;

/// Stream of ephemeral payloads on one broadcast topic
pub type BroadcastStream = BoxStream<'static, Result<TypingPayload, ChannelError>>;

/// Session provider
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Id of the signed-in user, or `SendError::Unauthenticated`
    async fn current_user_id(&self) -> Result<Uuid, SendError>;

    /// Name shown in push notifications
    async fn display_name(&self) -> Option<String> {
        None
    }
}

/// What a receipt update applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadTarget {
    /// A single message
    Message(MessageId),
    /// Every message addressed to `reader_id` in a conversation
    Conversation { conversation_id: Uuid, reader_id: Uuid },
}

/// Message persistence
#[async_trait]
pub trait MessageBackend: Send + Sync {
    /// Persist a message and return the stored row
    async fn insert_message(&self, message: NewMessage) -> Result<Message, SendError>;

    /// Page of history, oldest first
    async fn fetch_history(
        &self,
        conversation_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>, SendError>;

    /// Stamp read receipts
    async fn mark_read(&self, target: ReadTarget) -> Result<(), SendError>;
}

/// Realtime channel primitives
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Subscribe to rows inserted into a conversation (either party)
    async fn subscribe_inserts(&self, conversation_id: Uuid) -> Result<InsertStream, ChannelError>;

    /// Subscribe to an ephemeral broadcast topic
    async fn subscribe_broadcast(&self, topic: &str) -> Result<BroadcastStream, ChannelError>;

    /// Publish on an ephemeral broadcast topic, no acknowledgement
    async fn publish_broadcast(&self, topic: &str, payload: TypingPayload) -> Result<(), ChannelError>;
}

/// Durable key-value storage on the device
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Push notice for a newly sent message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessageNotice {
    pub recipient_id: Uuid,
    pub sender_name: String,
    pub preview: String,
    pub conversation_id: Uuid,
}

/// Push notification dispatch
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Fire-and-forget; errors are logged by the caller and otherwise ignored
    async fn notify_new_message(&self, notice: NewMessageNotice) -> Result<(), SendError>;
}

/// Dispatcher that drops every notice
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl NotificationDispatcher for NoopNotifier {
    async fn notify_new_message(&self, _notice: NewMessageNotice) -> Result<(), SendError> {
        Ok(())
    }
}
