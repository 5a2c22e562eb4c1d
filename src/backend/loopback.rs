//! In-process Loopback Backend
//!
//! Stores message rows in memory and fans inserts and typing broadcasts out
//! through `tokio::sync::broadcast`, one channel for inserts and one per
//! broadcast topic. All subscribers receive a copy of each event.
//!
//! Failure injection lets callers script rejections, take the whole backend
//! offline, or drop every live subscription to exercise resubscription.

use crate::client::collaborators::{
    BroadcastStream, InsertStream, MessageBackend, NewMessageNotice, NotificationDispatcher, RealtimeTransport,
    ReadTarget,
};
use crate::shared::error::{ChannelError, SendError};
use crate::shared::messaging::{Message, MessageId, MessageStatus, NewMessage, TypingPayload};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use uuid::Uuid;

/// Capacity of each fan-out channel
const CHANNEL_CAPACITY: usize = 1000;

struct LoopbackInner {
    rows: Mutex<Vec<Message>>,
    next_id: AtomicU64,
    inserts: Mutex<broadcast::Sender<Message>>,
    topics: Mutex<HashMap<String, broadcast::Sender<TypingPayload>>>,
    insert_failures: Mutex<VecDeque<SendError>>,
    reachable: AtomicBool,
    insert_attempts: AtomicU64,
    read_requests: Mutex<Vec<ReadTarget>>,
    notices: Mutex<Vec<NewMessageNotice>>,
}

/// Shared in-memory backend; clones talk to the same store
#[derive(Clone)]
pub struct LoopbackBackend {
    inner: Arc<LoopbackInner>,
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LoopbackBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackBackend")
            .field("rows", &lock(&self.inner.rows).len())
            .field("reachable", &self.is_reachable())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoopbackBackend {
    pub fn new() -> Self {
        let (inserts, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(LoopbackInner {
                rows: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                inserts: Mutex::new(inserts),
                topics: Mutex::new(HashMap::new()),
                insert_failures: Mutex::new(VecDeque::new()),
                reachable: AtomicBool::new(true),
                insert_attempts: AtomicU64::new(0),
                read_requests: Mutex::new(Vec::new()),
                notices: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Make every call fail as if the network were down
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
        if !reachable {
            self.drop_subscriptions();
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.inner.reachable.load(Ordering::SeqCst)
    }

    /// Fail the next insert with `error`; queued failures are used in order
    pub fn fail_next_insert(&self, error: SendError) {
        lock(&self.inner.insert_failures).push_back(error);
    }

    /// End every open insert and broadcast stream
    pub fn drop_subscriptions(&self) {
        let (inserts, _) = broadcast::channel(CHANNEL_CAPACITY);
        *lock(&self.inner.inserts) = inserts;
        lock(&self.inner.topics).clear();
        tracing::debug!("[LOOPBACK] Dropped all subscriptions");
    }

    /// Push an already stored row again, as a resubscription replay would
    pub fn replay(&self, id: &MessageId) -> bool {
        let row = lock(&self.inner.rows).iter().find(|m| &m.id == id).cloned();
        match row {
            Some(row) => {
                let _ = lock(&self.inner.inserts).send(row);
                true
            }
            None => false,
        }
    }

    /// Store a row written by some other client
    pub fn seed(&self, message: NewMessage) -> Message {
        self.store(message)
    }

    /// Every persisted row, in insert order
    pub fn rows(&self) -> Vec<Message> {
        lock(&self.inner.rows).clone()
    }

    pub fn rows_for(&self, conversation_id: Uuid) -> Vec<Message> {
        lock(&self.inner.rows)
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    /// Insert calls seen, successful or not
    pub fn insert_attempts(&self) -> u64 {
        self.inner.insert_attempts.load(Ordering::SeqCst)
    }

    pub fn read_requests(&self) -> Vec<ReadTarget> {
        lock(&self.inner.read_requests).clone()
    }

    /// Push notices received through [`NotificationDispatcher`]
    pub fn notices(&self) -> Vec<NewMessageNotice> {
        lock(&self.inner.notices).clone()
    }

    /// Rows addressed to `user` that are still unread
    pub fn unread_for(&self, user: Uuid) -> usize {
        lock(&self.inner.rows)
            .iter()
            .filter(|m| m.recipient_id == user && m.read_at.is_none())
            .count()
    }

    fn store(&self, message: NewMessage) -> Message {
        let sequence = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let row = {
            let mut rows = lock(&self.inner.rows);
            // server clock never runs backwards
            let now = Utc::now();
            let created_at = rows.last().map_or(now, |last| last.created_at.max(now));
            let row = Message {
                id: MessageId::server(format!("msg-{}", sequence)),
                conversation_id: message.conversation_id,
                sender_id: message.sender_id,
                recipient_id: message.recipient_id,
                body: message.body,
                created_at,
                delivered_at: None,
                read_at: None,
                status: MessageStatus::Sent,
                archived: false,
            };
            rows.push(row.clone());
            row
        };

        match lock(&self.inner.inserts).send(row.clone()) {
            Ok(subscribers) => tracing::debug!("[LOOPBACK] {} fanned out to {} subscriber(s)", row.id, subscribers),
            Err(_) => tracing::debug!("[LOOPBACK] No subscribers for {}", row.id),
        }
        row
    }

    fn topic_sender(&self, topic: &str) -> broadcast::Sender<TypingPayload> {
        lock(&self.inner.topics)
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    fn unreachable() -> SendError {
        SendError::transient("backend unreachable")
    }
}

fn lagged(topic: &str, error: BroadcastStreamRecvError) -> ChannelError {
    ChannelError::Stream {
        topic: topic.to_string(),
        message: error.to_string(),
    }
}

#[async_trait]
impl MessageBackend for LoopbackBackend {
    async fn insert_message(&self, message: NewMessage) -> Result<Message, SendError> {
        self.inner.insert_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.is_reachable() {
            return Err(Self::unreachable());
        }
        if let Some(error) = lock(&self.inner.insert_failures).pop_front() {
            return Err(error);
        }
        Ok(self.store(message))
    }

    async fn fetch_history(&self, conversation_id: Uuid, limit: u32, offset: u32) -> Result<Vec<Message>, SendError> {
        if !self.is_reachable() {
            return Err(Self::unreachable());
        }
        let mut rows = self.rows_for(conversation_id);
        rows.sort_by_key(|m| m.created_at);
        // newest page first, returned oldest first
        let end = rows.len().saturating_sub(offset as usize);
        let start = end.saturating_sub(limit as usize);
        Ok(rows[start..end].to_vec())
    }

    async fn mark_read(&self, target: ReadTarget) -> Result<(), SendError> {
        if !self.is_reachable() {
            return Err(Self::unreachable());
        }
        let now = Utc::now();
        {
            let mut rows = lock(&self.inner.rows);
            for row in rows.iter_mut() {
                let matches = match &target {
                    ReadTarget::Message(id) => &row.id == id,
                    ReadTarget::Conversation {
                        conversation_id,
                        reader_id,
                    } => row.conversation_id == *conversation_id && row.recipient_id == *reader_id,
                };
                if matches && row.read_at.is_none() {
                    row.mark_read_at(now);
                }
            }
        }
        lock(&self.inner.read_requests).push(target);
        Ok(())
    }
}

#[async_trait]
impl RealtimeTransport for LoopbackBackend {
    async fn subscribe_inserts(&self, conversation_id: Uuid) -> Result<InsertStream, ChannelError> {
        let topic = crate::shared::messaging::messages_topic(conversation_id);
        if !self.is_reachable() {
            return Err(ChannelError::Subscribe {
                topic,
                message: "backend unreachable".to_string(),
            });
        }
        let receiver = lock(&self.inner.inserts).subscribe();
        let stream = tokio_stream::wrappers::BroadcastStream::new(receiver).filter_map(move |item| {
            let topic = topic.clone();
            async move {
                match item {
                    Ok(row) if row.conversation_id == conversation_id => Some(Ok(row)),
                    Ok(_) => None,
                    Err(e) => Some(Err(lagged(&topic, e))),
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn subscribe_broadcast(&self, topic: &str) -> Result<BroadcastStream, ChannelError> {
        if !self.is_reachable() {
            return Err(ChannelError::Subscribe {
                topic: topic.to_string(),
                message: "backend unreachable".to_string(),
            });
        }
        let receiver = self.topic_sender(topic).subscribe();
        let topic = topic.to_string();
        let stream = tokio_stream::wrappers::BroadcastStream::new(receiver)
            .map(move |item| item.map_err(|e| lagged(&topic, e)));
        Ok(stream.boxed())
    }

    async fn publish_broadcast(&self, topic: &str, payload: TypingPayload) -> Result<(), ChannelError> {
        if !self.is_reachable() {
            return Err(ChannelError::Publish {
                topic: topic.to_string(),
                message: "backend unreachable".to_string(),
            });
        }
        // no subscribers is fine for an ephemeral event
        let _ = self.topic_sender(topic).send(payload);
        Ok(())
    }
}

#[async_trait]
impl NotificationDispatcher for LoopbackBackend {
    async fn notify_new_message(&self, notice: NewMessageNotice) -> Result<(), SendError> {
        lock(&self.inner.notices).push(notice);
        Ok(())
    }
}
