//! # Offline Message Queue
//!
//! Durable, ordered buffer of messages written while the device could not
//! reach the backend. Operations are replayed in enqueue order once
//! connectivity returns.
//!
//! ## Features
//!
//! - **Persistent Queue**: Every mutation is written to device storage at
//!   once; the queue is read back exactly once, when it is loaded
//! - **Ordered Replay**: Flushes walk operations in enqueue order; a
//!   retryable failure holds back later messages of the same conversation
//! - **Bounded Retries**: An operation is attempted at most `max_attempts`
//!   times, then removed and reported as failed
//! - **Non-reentrant Flush**: A flush already running swallows new triggers
//!   and picks up their work before returning
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sponsorlink::client::local_db::MemoryStore;
//! use sponsorlink::client::offline::OfflineQueue;
//! use sponsorlink::shared::{AppConfig, SendError};
//! use uuid::Uuid;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = OfflineQueue::load(Arc::new(MemoryStore::new()), &AppConfig::default()).await?;
//! queue.setup_auto_sync(|operation| async move {
//!     // hand the operation to the backend here
//!     Err::<sponsorlink::shared::Message, _>(SendError::transient(operation.body))
//! });
//!
//! queue.enqueue(Uuid::new_v4(), Uuid::new_v4(), "Hello offline!").await?;
//! let report = queue.flush().await;
//! println!("sent {} of {}", report.sent, report.attempted);
//! # Ok(())
//! # }
//! ```

use crate::client::collaborators::KeyValueStore;
use crate::client::offline::retry::{RetryDecision, RetryPolicy};
use crate::client::sync::{NetworkMonitor, Subscription};
use crate::shared::config::AppConfig;
use crate::shared::error::{SendError, StorageError};
use crate::shared::messaging::{validate_body, Message, MessageId};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Future returned by a registered send function
pub type SendFuture = BoxFuture<'static, Result<Message, SendError>>;

/// Network send used while draining the queue
pub type SendFn = Arc<dyn Fn(QueuedOperation) -> SendFuture + Send + Sync>;

const EVENT_CAPACITY: usize = 256;

/// Durably persisted intent to send one message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueuedOperation {
    /// Operation id; also names the provisional bubble
    pub id: Uuid,
    /// Conversation ID
    pub conversation_id: Uuid,
    /// Recipient ID
    pub recipient_id: Uuid,
    /// Message body
    pub body: String,
    /// Timestamp when queued
    pub enqueued_at: DateTime<Utc>,
    /// Failed send attempts so far
    pub retry_count: u32,
    /// Error message from last failure
    pub last_error: Option<String>,
}

impl QueuedOperation {
    /// Id of the provisional bubble showing this operation
    pub fn provisional_id(&self) -> MessageId {
        MessageId::provisional(self.id)
    }
}

/// Queue lifecycle notifications
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// Operation persisted
    Enqueued(QueuedOperation),
    /// Backend confirmed the send; operation removed
    Sent {
        operation: QueuedOperation,
        message: Message,
    },
    /// Attempt failed, operation kept for the next flush
    Retrying {
        operation: QueuedOperation,
        error: SendError,
    },
    /// Attempts exhausted, operation removed
    Failed {
        operation: QueuedOperation,
        error: SendError,
    },
}

/// Outcome of one flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Send attempts made
    pub attempted: usize,
    /// Operations confirmed and removed
    pub sent: usize,
    /// Operations that failed and stay queued
    pub retrying: usize,
    /// Operations removed after exhausting attempts
    pub failed: usize,
    /// Operations held back behind an earlier failure in the same conversation
    pub deferred: usize,
    /// Another flush was running; nothing was done
    pub skipped: bool,
}

impl FlushReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Operations waiting to be sent
    pub pending: usize,
    /// Pending operations that already failed at least once
    pub retrying: usize,
    /// Enqueue time of the oldest pending operation
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
}

/// Enqueue failure
#[derive(Debug, Error)]
pub enum QueueError {
    /// Body rejected before anything was stored
    #[error(transparent)]
    Invalid(#[from] SendError),
    /// Operation could not be persisted; nothing was queued
    #[error(transparent)]
    Storage(#[from] StorageError),
}

struct QueueInner {
    store: Arc<dyn KeyValueStore>,
    storage_key: String,
    policy: RetryPolicy,
    max_message_len: usize,
    operations: Mutex<VecDeque<QueuedOperation>>,
    /// Serializes snapshot writes so they land in mutation order
    write_gate: tokio::sync::Mutex<()>,
    /// Last snapshot write failed; storage lags behind memory
    dirty: AtomicBool,
    flushing: AtomicBool,
    rerun_requested: AtomicBool,
    send_fn: Mutex<Option<SendFn>>,
    network: Mutex<Option<(NetworkMonitor, Subscription)>>,
    events: broadcast::Sender<QueueEvent>,
}

/// Offline message queue; clones share the same queue
#[derive(Clone)]
pub struct OfflineQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("storage_key", &self.inner.storage_key)
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Clears the flushing flag even if the flush future is dropped
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl OfflineQueue {
    /// Load the persisted queue
    ///
    /// This is the only constructor, so no flush can run before the stored
    /// state is read. An unreadable snapshot is moved aside to
    /// `<key>.corrupt` and the queue starts empty.
    pub async fn load(store: Arc<dyn KeyValueStore>, config: &AppConfig) -> Result<Self, StorageError> {
        let storage_key = config.queue_storage_key.clone();
        let operations = match store.get(&storage_key).await? {
            Some(raw) => match serde_json::from_str::<VecDeque<QueuedOperation>>(&raw) {
                Ok(operations) => operations,
                Err(e) => {
                    tracing::error!("[QUEUE] Stored queue is unreadable, moving it aside: {}", e);
                    store.set(&format!("{}.corrupt", storage_key), &raw).await?;
                    store.remove(&storage_key).await?;
                    VecDeque::new()
                }
            },
            None => VecDeque::new(),
        };

        tracing::info!("[QUEUE] Loaded {} pending operation(s)", operations.len());

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(QueueInner {
                store,
                storage_key,
                policy: RetryPolicy::from_config(config),
                max_message_len: config.max_message_len,
                operations: Mutex::new(operations),
                write_gate: tokio::sync::Mutex::new(()),
                dirty: AtomicBool::new(false),
                flushing: AtomicBool::new(false),
                rerun_requested: AtomicBool::new(false),
                send_fn: Mutex::new(None),
                network: Mutex::new(None),
                events,
            }),
        })
    }

    /// Register the network send used by flushes
    ///
    /// Pending operations left over from a previous run are flushed right
    /// away when the device is online.
    pub fn setup_auto_sync<F, Fut>(&self, send: F)
    where
        F: Fn(QueuedOperation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Message, SendError>> + Send + 'static,
    {
        let send_fn: SendFn = Arc::new(move |operation| Box::pin(send(operation)));
        let previous = self
            .inner
            .send_fn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(send_fn);
        if previous.is_some() {
            tracing::warn!("[QUEUE] Auto-sync was already set up; replacing the send function");
        }

        if self.is_online() && self.pending_count() > 0 {
            spawn_flush(Arc::downgrade(&self.inner));
        }
    }

    /// Flush on every transition to online
    pub fn attach_network(&self, monitor: &NetworkMonitor) {
        let weak = Arc::downgrade(&self.inner);
        let subscription = monitor.subscribe(move |online| {
            if online {
                spawn_flush(weak.clone());
            }
        });
        *self
            .inner
            .network
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((monitor.clone(), subscription));
    }

    /// Stop following connectivity; the queue then assumes online
    pub fn detach_network(&self) {
        self.inner
            .network
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Queue a message; returns the operation id
    pub async fn enqueue(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
        body: impl Into<String>,
    ) -> Result<Uuid, QueueError> {
        self.enqueue_with_id(Uuid::new_v4(), conversation_id, recipient_id, body)
            .await
    }

    /// Queue a message under a caller-chosen operation id
    pub async fn enqueue_with_id(
        &self,
        operation_id: Uuid,
        conversation_id: Uuid,
        recipient_id: Uuid,
        body: impl Into<String>,
    ) -> Result<Uuid, QueueError> {
        let body = body.into();
        validate_body(&body, self.inner.max_message_len).map_err(SendError::from)?;

        let operation = QueuedOperation {
            id: operation_id,
            conversation_id,
            recipient_id,
            body,
            enqueued_at: Utc::now(),
            retry_count: 0,
            last_error: None,
        };

        let stored = operation.clone();
        if let Err(e) = self.mutate(move |ops| ops.push_back(stored)).await {
            // nothing durable happened, so nothing may stay in memory either
            self.lock_operations().retain(|op| op.id != operation_id);
            tracing::error!("[QUEUE] Failed to persist operation {}: {}", operation_id, e);
            return Err(e.into());
        }

        tracing::debug!(
            "[QUEUE] Enqueued {} for conversation {}",
            operation_id,
            conversation_id
        );
        let _ = self.inner.events.send(QueueEvent::Enqueued(operation));

        if self.is_online() {
            spawn_flush(Arc::downgrade(&self.inner));
        }
        Ok(operation_id)
    }

    /// Drain the queue in enqueue order
    pub async fn flush(&self) -> FlushReport {
        if !self.begin_flush() {
            self.inner.rerun_requested.store(true, Ordering::Release);
            tracing::debug!("[QUEUE] Flush already in progress");
            return FlushReport::skipped();
        }
        let mut guard = FlushGuard(&self.inner.flushing);
        self.inner.rerun_requested.store(false, Ordering::Release);

        let mut report = FlushReport::default();
        let Some(send) = self.send_fn() else {
            tracing::debug!("[QUEUE] Flush requested before auto-sync setup");
            return report;
        };
        if let Err(e) = self.persist_if_dirty().await {
            // sending now could repeat a send whose dequeue is not stored yet
            tracing::error!("[QUEUE] Storage still failing, flush postponed: {}", e);
            return report;
        }

        let mut attempted: HashSet<Uuid> = HashSet::new();
        let mut blocked: HashSet<Uuid> = HashSet::new();

        loop {
            let batch: Vec<QueuedOperation> = self
                .lock_operations()
                .iter()
                .filter(|op| !attempted.contains(&op.id))
                .cloned()
                .collect();

            for operation in batch {
                if !self.is_online() {
                    tracing::info!("[QUEUE] Went offline mid-flush, stopping");
                    return self.finish(report);
                }
                if blocked.contains(&operation.conversation_id) {
                    report.deferred += 1;
                    attempted.insert(operation.id);
                    continue;
                }
                attempted.insert(operation.id);
                report.attempted += 1;

                match send(operation.clone()).await {
                    Ok(message) => {
                        let id = operation.id;
                        let persisted = self.mutate(move |ops| ops.retain(|op| op.id != id)).await;
                        report.sent += 1;
                        let _ = self.inner.events.send(QueueEvent::Sent { operation, message });
                        if let Err(e) = persisted {
                            tracing::error!("[QUEUE] Failed to persist dequeue of {}, stopping: {}", id, e);
                            return self.finish(report);
                        }
                    }
                    Err(SendError::Unauthenticated) => {
                        // a missing session is not the operation's fault
                        tracing::warn!("[QUEUE] No session, pausing flush");
                        report.attempted -= 1;
                        return self.finish(report);
                    }
                    Err(error) => {
                        match self.record_failure(&operation, &error).await {
                            (RetryDecision::Retry, updated) => {
                                tracing::warn!(
                                    "[QUEUE] Send of {} failed (attempt {}): {}",
                                    updated.id,
                                    updated.retry_count,
                                    error
                                );
                                blocked.insert(updated.conversation_id);
                                report.retrying += 1;
                                let _ = self.inner.events.send(QueueEvent::Retrying {
                                    operation: updated,
                                    error,
                                });
                            }
                            (RetryDecision::GiveUp, updated) => {
                                tracing::error!(
                                    "[QUEUE] Giving up on {} after {} attempt(s): {}",
                                    updated.id,
                                    updated.retry_count,
                                    error
                                );
                                report.failed += 1;
                                let _ = self.inner.events.send(QueueEvent::Failed {
                                    operation: updated,
                                    error,
                                });
                            }
                        }
                    }
                }
            }

            // triggers that arrived mid-flush only bring operations not yet tried
            if self.inner.rerun_requested.swap(false, Ordering::AcqRel) {
                continue;
            }
            // a trigger may land between the check above and the release
            drop(guard);
            if !self.inner.rerun_requested.swap(false, Ordering::AcqRel) || !self.begin_flush() {
                break;
            }
            guard = FlushGuard(&self.inner.flushing);
        }

        self.finish(report)
    }

    fn begin_flush(&self) -> bool {
        self.inner
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Rewrite the snapshot if an earlier write was lost
    async fn persist_if_dirty(&self) -> Result<(), StorageError> {
        if !self.inner.dirty.load(Ordering::Acquire) {
            return Ok(());
        }
        self.mutate(|_| ()).await?;
        tracing::info!("[QUEUE] Stored queue caught up after an earlier write failure");
        Ok(())
    }

    fn finish(&self, report: FlushReport) -> FlushReport {
        if report.attempted > 0 {
            tracing::info!(
                "[QUEUE] Flush done: {} sent, {} retrying, {} failed, {} deferred",
                report.sent,
                report.retrying,
                report.failed,
                report.deferred
            );
        }
        report
    }

    /// Count a failed attempt; removes the operation when the policy gives up
    async fn record_failure(
        &self,
        operation: &QueuedOperation,
        error: &SendError,
    ) -> (RetryDecision, QueuedOperation) {
        let policy = self.inner.policy;
        let id = operation.id;
        let message = error.to_string();
        let fallback = operation.clone();

        let outcome = self
            .mutate(move |ops| {
                let position = ops.iter().position(|op| op.id == id)?;
                let op = &mut ops[position];
                op.retry_count = op.retry_count.saturating_add(1);
                op.last_error = Some(message);
                let updated = op.clone();
                let decision = policy.decide(updated.retry_count, error);
                if decision == RetryDecision::GiveUp {
                    ops.remove(position);
                }
                Some((decision, updated))
            })
            .await;

        match outcome {
            Ok(Some(result)) => result,
            Ok(None) => (RetryDecision::GiveUp, fallback),
            Err(e) => {
                tracing::error!("[QUEUE] Failed to persist retry state of {}: {}", id, e);
                let in_memory = self.lock_operations().iter().find(|op| op.id == id).cloned();
                match in_memory {
                    Some(op) => (RetryDecision::Retry, op),
                    None => (RetryDecision::GiveUp, fallback),
                }
            }
        }
    }

    /// Apply a mutation and write the resulting snapshot before returning
    async fn mutate<R>(
        &self,
        apply: impl FnOnce(&mut VecDeque<QueuedOperation>) -> R,
    ) -> Result<R, StorageError> {
        let _gate = self.inner.write_gate.lock().await;
        let (result, snapshot) = {
            let mut operations = self.lock_operations();
            let result = apply(&mut operations);
            let snapshot = if operations.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&*operations)?)
            };
            (result, snapshot)
        };
        let written = match snapshot {
            Some(json) => self.inner.store.set(&self.inner.storage_key, &json).await,
            None => self.inner.store.remove(&self.inner.storage_key).await,
        };
        self.inner.dirty.store(written.is_err(), Ordering::Release);
        written?;
        Ok(result)
    }

    /// Number of operations waiting to be sent
    pub fn pending_count(&self) -> usize {
        self.lock_operations().len()
    }

    /// Pending operations of one conversation, in enqueue order
    pub fn pending_for(&self, conversation_id: Uuid) -> Vec<QueuedOperation> {
        self.lock_operations()
            .iter()
            .filter(|op| op.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    /// All pending operations, in enqueue order
    pub fn operations(&self) -> Vec<QueuedOperation> {
        self.lock_operations().iter().cloned().collect()
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        let operations = self.lock_operations();
        QueueStats {
            pending: operations.len(),
            retrying: operations.iter().filter(|op| op.retry_count > 0).count(),
            oldest_enqueued_at: operations.iter().map(|op| op.enqueued_at).min(),
        }
    }

    /// Whether a flush is running
    pub fn is_flushing(&self) -> bool {
        self.inner.flushing.load(Ordering::Acquire)
    }

    /// Subscribe to queue lifecycle events
    pub fn events(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Drop every pending operation (sign-out)
    pub async fn clear(&self) -> Result<usize, StorageError> {
        let removed = self
            .mutate(|ops| {
                let count = ops.len();
                ops.clear();
                count
            })
            .await?;
        tracing::info!("[QUEUE] Cleared {} operation(s)", removed);
        Ok(removed)
    }

    fn is_online(&self) -> bool {
        self.inner
            .network
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(monitor, _)| monitor.current())
            .unwrap_or(true)
    }

    fn send_fn(&self) -> Option<SendFn> {
        self.inner
            .send_fn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_operations(&self) -> std::sync::MutexGuard<'_, VecDeque<QueuedOperation>> {
        self.inner
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run a flush in the background if the queue is still alive
fn spawn_flush(inner: Weak<QueueInner>) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("[QUEUE] No async runtime available, flush not started");
        return;
    };
    handle.spawn(async move {
        if let Some(inner) = inner.upgrade() {
            OfflineQueue { inner }.flush().await;
        }
    });
}
