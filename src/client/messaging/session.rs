//! Conversation Session
//!
//! One open conversation: its [`ConversationView`], the two realtime
//! channels feeding it, the typing indicator and the submit/retry actions.
//! History, realtime rows and typing signals all pass through
//! [`ConversationEvent`] and the same apply step.
//!
//! The view lives behind a `std::sync::Mutex` that is never held across an
//! await, so every change lands in one critical section.

use crate::client::collaborators::{AuthProvider, MessageBackend, ReadTarget};
use crate::client::messaging::realtime::{ChannelHandle, RealtimeChannels};
use crate::client::messaging::sender::MessageSender;
use crate::client::messaging::state::FailedOperations;
use crate::client::messaging::typing::TypingIndicator;
use crate::client::offline::optimistic::{provisional_bubble, reseeded_bubble, FailureRoute, SubmitOutcome};
use crate::client::offline::queue::{OfflineQueue, QueueError, QueuedOperation};
use crate::client::offline::reconciliation::{ConversationSnapshot, ConversationView, MergeOutcome};
use crate::client::sync::NetworkMonitor;
use crate::shared::config::AppConfig;
use crate::shared::error::SendError;
use crate::shared::event::ConversationEvent;
use crate::shared::messaging::{validate_body, Message, MessageId, MessageStatus};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Everything a session needs from the process
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub config: AppConfig,
    pub auth: Arc<dyn AuthProvider>,
    pub backend: Arc<dyn MessageBackend>,
    pub sender: MessageSender,
    pub channels: RealtimeChannels,
    pub queue: OfflineQueue,
    pub network: NetworkMonitor,
    pub failed: FailedOperations,
}

/// State shared between the session and its background tasks
struct SessionShared {
    conversation_id: Uuid,
    current_user: Uuid,
    view: Mutex<ConversationView>,
    revision: watch::Sender<u64>,
    typing: TypingIndicator,
}

impl SessionShared {
    fn lock(&self) -> MutexGuard<'_, ConversationView> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one change to the view and publish a new revision
    fn update<R>(&self, apply: impl FnOnce(&mut ConversationView) -> R) -> R {
        let result = apply(&mut self.lock());
        self.revision.send_modify(|revision| *revision = revision.wrapping_add(1));
        result
    }

    fn apply_event(&self, event: ConversationEvent) {
        match event {
            ConversationEvent::History(rows) => {
                let inserted = self.update(|view| view.apply_history(rows));
                tracing::debug!("[SESSION] Seeded {} with {} row(s)", self.conversation_id, inserted);
            }
            ConversationEvent::Message(row) => {
                let id = row.id.clone();
                let outcome = self.update(|view| view.merge_server(row, self.current_user));
                match outcome {
                    MergeOutcome::Replaced(provisional) => {
                        tracing::debug!("[SESSION] {} confirmed {} via realtime", id, provisional);
                    }
                    MergeOutcome::Unchanged => {
                        tracing::debug!("[SESSION] Ignored duplicate {}", id);
                    }
                    _ => tracing::debug!("[SESSION] Merged {}", id),
                }
            }
            ConversationEvent::Typing(signal) => {
                if signal.user_id != self.current_user {
                    self.typing.apply(signal.is_typing);
                }
            }
        }
    }
}

/// An open conversation
pub struct ConversationSession {
    conversation_id: Uuid,
    recipient_id: Uuid,
    current_user: Uuid,
    ctx: SessionContext,
    shared: Arc<SessionShared>,
    message_channel: ChannelHandle,
    typing_channel: ChannelHandle,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSession")
            .field("conversation_id", &self.conversation_id)
            .field("recipient_id", &self.recipient_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConversationSession {
    /// Open a conversation: channels, history, reseeded bubbles, read receipts
    pub(crate) async fn open(
        ctx: SessionContext,
        conversation_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<Arc<Self>, SendError> {
        let current_user = ctx.auth.current_user_id().await?;

        let (revision, _) = watch::channel(0u64);
        let decay = ctx.config.typing_decay;
        let shared = Arc::new_cyclic(|weak: &Weak<SessionShared>| {
            let weak = weak.clone();
            SessionShared {
                conversation_id,
                current_user,
                view: Mutex::new(ConversationView::new(conversation_id)),
                revision,
                typing: TypingIndicator::new(decay, move |typing| {
                    if let Some(shared) = weak.upgrade() {
                        shared.update(|view| view.set_counterpart_typing(typing));
                    }
                }),
            }
        });

        // subscribe before fetching so nothing inserted in between is missed
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let message_channel = ctx.channels.message_stream(conversation_id, events_tx.clone());
        let typing_channel = ctx.channels.typing_stream(conversation_id, events_tx);

        match ctx
            .backend
            .fetch_history(conversation_id, ctx.config.history_page_size, 0)
            .await
        {
            Ok(rows) => shared.apply_event(ConversationEvent::History(rows)),
            Err(SendError::Unauthenticated) => {
                message_channel.close();
                typing_channel.close();
                return Err(SendError::Unauthenticated);
            }
            Err(e) => {
                tracing::warn!("[SESSION] History fetch for {} failed: {}", conversation_id, e);
            }
        }

        let mut leftovers: Vec<(QueuedOperation, MessageStatus)> = ctx
            .queue
            .pending_for(conversation_id)
            .into_iter()
            .map(|op| (op, MessageStatus::Queued))
            .chain(
                ctx.failed
                    .for_conversation(conversation_id)
                    .into_iter()
                    .map(|op| (op, MessageStatus::Failed)),
            )
            .collect();
        leftovers.sort_by_key(|(op, _)| op.enqueued_at);
        if !leftovers.is_empty() {
            shared.update(|view| {
                for (operation, status) in &leftovers {
                    if !view.contains(&operation.provisional_id()) {
                        view.restore_provisional(reseeded_bubble(operation, current_user, *status));
                    }
                }
            });
        }

        let pump_shared = Arc::clone(&shared);
        let pump = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                pump_shared.apply_event(event);
            }
        });

        let session = Arc::new(Self {
            conversation_id,
            recipient_id,
            current_user,
            ctx,
            shared,
            message_channel,
            typing_channel,
            tasks: Mutex::new(vec![pump]),
            closed: AtomicBool::new(false),
        });

        let receipts = session.spawn_mark_read();
        session.lock_tasks().push(receipts);

        tracing::info!(
            "[SESSION] Opened conversation {} ({} message(s))",
            conversation_id,
            session.shared.lock().len()
        );
        Ok(session)
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn recipient_id(&self) -> Uuid {
        self.recipient_id
    }

    pub fn current_user(&self) -> Uuid {
        self.current_user
    }

    /// Submit a new message
    ///
    /// The bubble is in the view before this first awaits. Validation and
    /// auth errors come back as `Err`; a rejected send comes back as
    /// [`SubmitOutcome::RolledBack`].
    pub async fn submit(&self, text: impl Into<String>) -> Result<SubmitOutcome, SendError> {
        let text = text.into();
        validate_body(&text, self.ctx.config.max_message_len)?;
        self.ensure_open()?;

        let operation_id = Uuid::new_v4();
        let online = self.ctx.network.current();
        let bubble = provisional_bubble(
            operation_id,
            self.conversation_id,
            self.current_user,
            self.recipient_id,
            &text,
            online,
        );
        let provisional_id = bubble.id.clone();
        self.shared.update(|view| {
            view.take_draft();
            view.dismiss_error();
            view.insert_provisional(bubble);
        });

        if !online {
            return self.hand_to_queue(operation_id, &provisional_id, text).await;
        }

        match self
            .ctx
            .sender
            .send(self.conversation_id, self.recipient_id, &text)
            .await
        {
            Ok(row) => {
                self.shared.update(|view| view.confirm(&provisional_id, row.clone()));
                Ok(SubmitOutcome::Sent(row))
            }
            Err(error) => match FailureRoute::for_error(&error) {
                FailureRoute::Queue => {
                    tracing::warn!("[SESSION] Send failed, queuing {}: {}", provisional_id, error);
                    self.hand_to_queue(operation_id, &provisional_id, text).await
                }
                FailureRoute::Rollback => {
                    tracing::warn!("[SESSION] Send rejected, rolling back {}: {}", provisional_id, error);
                    self.rollback(&provisional_id, text.clone(), &error);
                    Ok(SubmitOutcome::RolledBack { draft: text, error })
                }
                FailureRoute::Propagate => {
                    self.rollback(&provisional_id, text, &error);
                    Err(error)
                }
            },
        }
    }

    async fn hand_to_queue(
        &self,
        operation_id: Uuid,
        provisional_id: &MessageId,
        text: String,
    ) -> Result<SubmitOutcome, SendError> {
        self.shared
            .update(|view| view.set_status(provisional_id, MessageStatus::Queued));

        match self
            .ctx
            .queue
            .enqueue_with_id(operation_id, self.conversation_id, self.recipient_id, text.clone())
            .await
        {
            Ok(_) => Ok(SubmitOutcome::Queued(provisional_id.clone())),
            Err(QueueError::Invalid(error)) => {
                self.rollback(provisional_id, text, &error);
                Err(error)
            }
            Err(QueueError::Storage(e)) => {
                tracing::error!("[SESSION] Could not queue {}: {}", provisional_id, e);
                let error = SendError::transient(format!("message could not be saved for later: {}", e));
                self.rollback(provisional_id, text.clone(), &error);
                Ok(SubmitOutcome::RolledBack { draft: text, error })
            }
        }
    }

    fn rollback(&self, provisional_id: &MessageId, text: String, error: &SendError) {
        self.shared.update(|view| {
            view.remove(provisional_id);
            view.restore_draft(text);
            view.set_send_error(error.to_string());
        });
    }

    /// Resubmit a bubble that failed for good
    pub async fn retry(&self, message_id: &MessageId) -> Result<SubmitOutcome, SendError> {
        let body = self.take_failed(message_id)?;
        self.submit(body).await
    }

    /// Drop a failed bubble without resending it
    pub fn discard(&self, message_id: &MessageId) -> Result<(), SendError> {
        self.take_failed(message_id).map(|_| ())
    }

    fn take_failed(&self, message_id: &MessageId) -> Result<String, SendError> {
        let removed = self.shared.update(|view| {
            let failed = view
                .get(message_id)
                .map_or(false, |message| message.status == MessageStatus::Failed);
            if failed {
                view.remove(message_id)
            } else {
                None
            }
        });
        let message = removed
            .ok_or_else(|| SendError::validation("message_id", "only failed messages can be retried"))?;
        if let Some(operation_id) = message_id.operation_id() {
            self.ctx.failed.forget(self.conversation_id, operation_id);
        }
        Ok(message.body)
    }

    /// Clear the send error
    pub fn dismiss_error(&self) -> bool {
        self.shared.update(|view| view.dismiss_error())
    }

    /// Hand the restored draft to the composer
    pub fn take_draft(&self) -> Option<String> {
        self.shared.update(|view| view.take_draft())
    }

    /// Mark every message addressed to the current user as read
    pub async fn mark_all_read(&self) -> Result<usize, SendError> {
        mark_read(&self.ctx.backend, &self.shared).await
    }

    fn spawn_mark_read(&self) -> JoinHandle<()> {
        let backend = Arc::clone(&self.ctx.backend);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            if let Err(e) = mark_read(&backend, &shared).await {
                tracing::warn!("[SESSION] Marking {} read failed: {}", shared.conversation_id, e);
            }
        })
    }

    /// Publish our own typing state; best effort
    pub async fn send_typing(&self, is_typing: bool) {
        self.ctx
            .channels
            .send_typing(&self.typing_channel, self.current_user, self.conversation_id, is_typing)
            .await;
    }

    /// A queued operation of this conversation was sent
    pub(crate) fn on_queue_sent(&self, operation: &QueuedOperation, message: Message) {
        let provisional_id = operation.provisional_id();
        let outcome = self.shared.update(|view| view.confirm(&provisional_id, message));
        tracing::debug!("[SESSION] Queued {} confirmed: {:?}", provisional_id, outcome);
    }

    /// A queued operation of this conversation failed for good
    pub(crate) fn on_queue_failed(&self, operation: &QueuedOperation) {
        let current_user = self.current_user;
        self.shared.update(|view| {
            if !view.mark_failed(&operation.provisional_id()) {
                view.restore_provisional(reseeded_bubble(operation, current_user, MessageStatus::Failed));
            }
        });
    }

    /// Current read model
    pub fn snapshot(&self) -> ConversationSnapshot {
        self.shared
            .lock()
            .snapshot(self.current_user, self.ctx.config.preview_len)
    }

    /// Revision counter bumped on every view change
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    pub fn message_channel(&self) -> &ChannelHandle {
        &self.message_channel
    }

    pub fn typing_channel(&self) -> &ChannelHandle {
        &self.typing_channel
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tear down channels, timers and tasks; safe to call repeatedly
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.message_channel.close();
        self.typing_channel.close();
        self.shared.typing.cancel();
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
        tracing::info!("[SESSION] Closed conversation {}", self.conversation_id);
    }

    fn ensure_open(&self) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::validation("conversation_id", "conversation is closed"));
        }
        Ok(())
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Stamp receipts on the backend, then locally once it accepted them
async fn mark_read(backend: &Arc<dyn MessageBackend>, shared: &SessionShared) -> Result<usize, SendError> {
    backend
        .mark_read(ReadTarget::Conversation {
            conversation_id: shared.conversation_id,
            reader_id: shared.current_user,
        })
        .await?;
    let stamped = shared.update(|view| view.mark_read_by(shared.current_user, Utc::now()));
    Ok(stamped)
}
