//! Messaging State
//!
//! [`Messenger`] is the process-wide coordinator: it owns the offline queue,
//! the send path and a map of open conversation sessions, and routes queue
//! outcomes to whichever session shows the affected bubble. Sessions are
//! created when a conversation screen opens and torn down when it closes.

use crate::client::collaborators::{
    AuthProvider, KeyValueStore, MessageBackend, NotificationDispatcher, RealtimeTransport,
};
use crate::client::messaging::realtime::RealtimeChannels;
use crate::client::messaging::sender::MessageSender;
use crate::client::messaging::session::{ConversationSession, SessionContext};
use crate::client::offline::optimistic::SubmitOutcome;
use crate::client::offline::queue::{FlushReport, OfflineQueue, QueueEvent, QueuedOperation};
use crate::client::sync::NetworkMonitor;
use crate::shared::config::AppConfig;
use crate::shared::error::{SendError, StorageError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// External collaborators the messaging core runs against
#[derive(Clone)]
pub struct Collaborators {
    pub auth: Arc<dyn AuthProvider>,
    pub backend: Arc<dyn MessageBackend>,
    pub transport: Arc<dyn RealtimeTransport>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub store: Arc<dyn KeyValueStore>,
}

/// Queued operations that exhausted their attempts, per conversation
///
/// Kept in memory so a reopened conversation still shows its failed bubbles.
#[derive(Debug, Clone, Default)]
pub struct FailedOperations {
    inner: Arc<Mutex<HashMap<Uuid, Vec<QueuedOperation>>>>,
}

impl FailedOperations {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Vec<QueuedOperation>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, operation: QueuedOperation) {
        self.lock()
            .entry(operation.conversation_id)
            .or_default()
            .push(operation);
    }

    pub fn for_conversation(&self, conversation_id: Uuid) -> Vec<QueuedOperation> {
        self.lock().get(&conversation_id).cloned().unwrap_or_default()
    }

    pub fn forget(&self, conversation_id: Uuid, operation_id: Uuid) {
        let mut failed = self.lock();
        if let Some(operations) = failed.get_mut(&conversation_id) {
            operations.retain(|op| op.id != operation_id);
            if operations.is_empty() {
                failed.remove(&conversation_id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct MessengerInner {
    ctx: SessionContext,
    sessions: Mutex<HashMap<Uuid, Arc<ConversationSession>>>,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl MessengerInner {
    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<ConversationSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self, conversation_id: Uuid) -> Option<Arc<ConversationSession>> {
        self.lock_sessions().get(&conversation_id).cloned()
    }

    fn route(&self, event: QueueEvent) {
        match event {
            QueueEvent::Sent { operation, message } => {
                if let Some(session) = self.session(operation.conversation_id) {
                    session.on_queue_sent(&operation, message);
                }
            }
            QueueEvent::Failed { operation, error } => {
                tracing::warn!(
                    "[MESSENGER] Message {} in {} failed for good: {}",
                    operation.id,
                    operation.conversation_id,
                    error
                );
                self.ctx.failed.record(operation.clone());
                if let Some(session) = self.session(operation.conversation_id) {
                    session.on_queue_failed(&operation);
                }
            }
            QueueEvent::Enqueued(_) | QueueEvent::Retrying { .. } => {}
        }
    }
}

impl Drop for MessengerInner {
    fn drop(&mut self) {
        if let Some(router) = self
            .router
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            router.abort();
        }
        for (_, session) in self
            .sessions
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
        {
            session.close();
        }
    }
}

/// Messaging coordinator; clones share state
#[derive(Clone)]
pub struct Messenger {
    inner: Arc<MessengerInner>,
}

impl std::fmt::Debug for Messenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messenger")
            .field("open_conversations", &self.inner.lock_sessions().len())
            .field("queue", &self.inner.ctx.queue)
            .finish()
    }
}

impl Messenger {
    /// Load the offline queue and wire it to the send path and the network
    ///
    /// Must be called within a tokio runtime.
    pub async fn start(
        config: AppConfig,
        collaborators: Collaborators,
        network: NetworkMonitor,
    ) -> Result<Self, StorageError> {
        let queue = OfflineQueue::load(Arc::clone(&collaborators.store), &config).await?;
        let sender = MessageSender::new(
            Arc::clone(&collaborators.auth),
            Arc::clone(&collaborators.backend),
            Arc::clone(&collaborators.notifier),
            config.preview_len,
        );
        let channels = RealtimeChannels::new(Arc::clone(&collaborators.transport), &config)
            .with_network(network.watch());

        let ctx = SessionContext {
            config,
            auth: collaborators.auth,
            backend: collaborators.backend,
            sender: sender.clone(),
            channels,
            queue: queue.clone(),
            network: network.clone(),
            failed: FailedOperations::default(),
        };

        let inner = Arc::new(MessengerInner {
            ctx,
            sessions: Mutex::new(HashMap::new()),
            router: Mutex::new(None),
        });

        // subscribe before auto-sync so no outcome of the first flush is missed
        let events = queue.events();
        let router = tokio::spawn(route_queue_events(Arc::downgrade(&inner), events));
        *inner.router.lock().unwrap_or_else(PoisonError::into_inner) = Some(router);

        queue.attach_network(&network);
        queue.setup_auto_sync(move |operation| {
            let sender = sender.clone();
            async move {
                sender
                    .send(operation.conversation_id, operation.recipient_id, &operation.body)
                    .await
            }
        });

        tracing::info!("[MESSENGER] Started with {} queued message(s)", queue.pending_count());
        Ok(Self { inner })
    }

    /// Open a conversation screen, or return the already open session
    pub async fn open_conversation(
        &self,
        conversation_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<Arc<ConversationSession>, SendError> {
        if let Some(session) = self.inner.session(conversation_id) {
            return Ok(session);
        }

        let session = ConversationSession::open(self.inner.ctx.clone(), conversation_id, recipient_id).await?;

        let mut sessions = self.inner.lock_sessions();
        if let Some(existing) = sessions.get(&conversation_id) {
            // lost a race with a concurrent open
            session.close();
            return Ok(Arc::clone(existing));
        }
        sessions.insert(conversation_id, Arc::clone(&session));
        Ok(session)
    }

    /// Close a conversation screen; returns whether it was open
    pub fn close_conversation(&self, conversation_id: Uuid) -> bool {
        let removed = self.inner.lock_sessions().remove(&conversation_id);
        match removed {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Session of an open conversation
    pub fn session(&self, conversation_id: Uuid) -> Option<Arc<ConversationSession>> {
        self.inner.session(conversation_id)
    }

    /// Ids of open conversations
    pub fn open_conversations(&self) -> Vec<Uuid> {
        self.inner.lock_sessions().keys().copied().collect()
    }

    /// Submit into an open conversation
    pub async fn submit(&self, conversation_id: Uuid, text: impl Into<String>) -> Result<SubmitOutcome, SendError> {
        let session = self
            .inner
            .session(conversation_id)
            .ok_or_else(|| SendError::validation("conversation_id", "conversation is not open"))?;
        session.submit(text).await
    }

    /// Flush the offline queue now
    pub async fn flush(&self) -> FlushReport {
        self.inner.ctx.queue.flush().await
    }

    /// Messages waiting in the offline queue
    pub fn pending_count(&self) -> usize {
        self.inner.ctx.queue.pending_count()
    }

    /// Failed operations of a conversation
    pub fn failed_for(&self, conversation_id: Uuid) -> Vec<QueuedOperation> {
        self.inner.ctx.failed.for_conversation(conversation_id)
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.inner.ctx.queue
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.inner.ctx.network
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.ctx.config
    }

    /// Close every open conversation
    pub fn close_all(&self) {
        let sessions: Vec<_> = self.inner.lock_sessions().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close();
        }
    }
}

async fn route_queue_events(inner: Weak<MessengerInner>, mut events: broadcast::Receiver<QueueEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match inner.upgrade() {
                Some(inner) => inner.route(event),
                None => return,
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("[MESSENGER] Missed {} queue event(s)", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
