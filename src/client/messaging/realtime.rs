//! Realtime Delivery Channel
//!
//! Keeps one live subscription per open conversation for persisted message
//! inserts and one for ephemeral typing broadcasts. Each subscription runs in
//! its own task that resubscribes with exponential backoff after any drop;
//! events missed during the gap are not replayed.

use crate::client::collaborators::RealtimeTransport;
use crate::client::offline::retry::Backoff;
use crate::shared::config::AppConfig;
use crate::shared::error::ChannelError;
use crate::shared::event::ConversationEvent;
use crate::shared::messaging::{messages_topic, typing_topic, Message, TypingPayload, TypingSignal};
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Lifecycle of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unopened,
    Subscribing,
    Active,
    Closed,
}

type Connect<T> =
    Box<dyn Fn() -> BoxFuture<'static, Result<BoxStream<'static, Result<T, ChannelError>>, ChannelError>> + Send + Sync>;
type Deliver<T> = Box<dyn Fn(T) + Send + Sync>;

/// Handle to an open channel; closing it stops delivery
#[derive(Debug)]
pub struct ChannelHandle {
    topic: String,
    conversation_id: Uuid,
    state: Arc<watch::Sender<ChannelState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// Current state
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Watch state changes
    pub fn status(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Stop the subscription; safe to call repeatedly
    pub fn close(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
            tracing::debug!("[REALTIME] Closed {}", self.topic);
        }
        self.state.send_replace(ChannelState::Closed);
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Move to `next` unless the channel was closed meanwhile
fn transition(state: &watch::Sender<ChannelState>, next: ChannelState) -> bool {
    state.send_if_modified(|current| match *current {
        ChannelState::Closed => false,
        _ if *current == next => false,
        _ => {
            *current = next;
            true
        }
    })
}

/// Opens realtime channels over a transport
#[derive(Clone)]
pub struct RealtimeChannels {
    transport: Arc<dyn RealtimeTransport>,
    backoff: Backoff,
    network: Option<watch::Receiver<bool>>,
}

impl RealtimeChannels {
    pub fn new(transport: Arc<dyn RealtimeTransport>, config: &AppConfig) -> Self {
        Self {
            transport,
            backoff: Backoff::from_config(config),
            network: None,
        }
    }

    /// Cut the reconnect wait short whenever connectivity comes back
    pub fn with_network(mut self, online: watch::Receiver<bool>) -> Self {
        self.network = Some(online);
        self
    }

    /// Subscribe to persisted inserts of one conversation, from either party
    ///
    /// Must be called within a tokio runtime.
    pub fn open_message_channel<F>(&self, conversation_id: Uuid, on_message: F) -> ChannelHandle
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let transport = Arc::clone(&self.transport);
        let connect: Connect<Message> = Box::new(move || {
            let transport = Arc::clone(&transport);
            Box::pin(async move { transport.subscribe_inserts(conversation_id).await })
        });
        let deliver: Deliver<Message> = Box::new(move |message: Message| {
            if message.conversation_id == conversation_id {
                on_message(message);
            }
        });
        self.spawn_channel(messages_topic(conversation_id), conversation_id, connect, deliver)
    }

    /// Subscribe to typing broadcasts of one conversation
    ///
    /// Must be called within a tokio runtime.
    pub fn open_typing_channel<F>(&self, conversation_id: Uuid, on_typing: F) -> ChannelHandle
    where
        F: Fn(TypingSignal) + Send + Sync + 'static,
    {
        let topic = typing_topic(conversation_id);
        let transport = Arc::clone(&self.transport);
        let subscribe_topic = topic.clone();
        let connect: Connect<TypingPayload> = Box::new(move || {
            let transport = Arc::clone(&transport);
            let topic = subscribe_topic.clone();
            Box::pin(async move { transport.subscribe_broadcast(&topic).await })
        });
        let deliver: Deliver<TypingPayload> = Box::new(move |payload: TypingPayload| {
            if payload.conversation_id == conversation_id {
                on_typing(TypingSignal::received(payload));
            }
        });
        self.spawn_channel(topic, conversation_id, connect, deliver)
    }

    /// Message channel feeding a uniform event stream
    pub fn message_stream(
        &self,
        conversation_id: Uuid,
        sink: mpsc::UnboundedSender<ConversationEvent>,
    ) -> ChannelHandle {
        self.open_message_channel(conversation_id, move |message| {
            let _ = sink.send(ConversationEvent::Message(message));
        })
    }

    /// Typing channel feeding a uniform event stream
    pub fn typing_stream(
        &self,
        conversation_id: Uuid,
        sink: mpsc::UnboundedSender<ConversationEvent>,
    ) -> ChannelHandle {
        self.open_typing_channel(conversation_id, move |signal| {
            let _ = sink.send(ConversationEvent::Typing(signal));
        })
    }

    /// Publish a typing event; best effort, errors are only logged
    pub async fn send_typing(&self, handle: &ChannelHandle, user_id: Uuid, conversation_id: Uuid, is_typing: bool) {
        if handle.state() == ChannelState::Closed {
            tracing::debug!("[REALTIME] Typing event dropped, {} is closed", handle.topic());
            return;
        }
        let payload = TypingPayload {
            conversation_id,
            user_id,
            is_typing,
        };
        if let Err(e) = self.transport.publish_broadcast(handle.topic(), payload).await {
            tracing::debug!("[REALTIME] Typing publish failed: {}", e);
        }
    }

    fn spawn_channel<T: Send + 'static>(
        &self,
        topic: String,
        conversation_id: Uuid,
        connect: Connect<T>,
        deliver: Deliver<T>,
    ) -> ChannelHandle {
        let (state, _) = watch::channel(ChannelState::Unopened);
        let state = Arc::new(state);
        let task = tokio::spawn(run_channel(
            topic.clone(),
            connect,
            deliver,
            Arc::clone(&state),
            self.backoff.clone(),
            self.network.clone(),
        ));
        ChannelHandle {
            topic,
            conversation_id,
            state,
            task: Mutex::new(Some(task)),
        }
    }
}

async fn run_channel<T>(
    topic: String,
    connect: Connect<T>,
    deliver: Deliver<T>,
    state: Arc<watch::Sender<ChannelState>>,
    mut backoff: Backoff,
    mut network: Option<watch::Receiver<bool>>,
) {
    loop {
        if !transition(&state, ChannelState::Subscribing) && *state.borrow() == ChannelState::Closed {
            return;
        }

        match connect().await {
            Ok(mut stream) => {
                transition(&state, ChannelState::Active);
                backoff.reset();
                tracing::info!("[REALTIME] Subscribed to {}", topic);

                loop {
                    match stream.next().await {
                        Some(Ok(item)) => {
                            if *state.borrow() == ChannelState::Closed {
                                return;
                            }
                            deliver(item);
                        }
                        Some(Err(e)) => {
                            tracing::warn!("[REALTIME] {} dropped (will resubscribe): {}", topic, e);
                            break;
                        }
                        None => {
                            tracing::warn!("[REALTIME] {} ended by transport (will resubscribe)", topic);
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("[REALTIME] Subscribe to {} failed (will retry): {}", topic, e);
            }
        }

        transition(&state, ChannelState::Subscribing);
        let delay = backoff.next_delay();
        match network.as_mut() {
            Some(online) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wait_for_reconnect(online) => {
                        tracing::debug!("[REALTIME] Connectivity restored, resubscribing {} now", topic);
                    }
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}

/// Resolves on the next offline to online transition
async fn wait_for_reconnect(online: &mut watch::Receiver<bool>) {
    if online.wait_for(|up| !*up).await.is_err() {
        return std::future::pending().await;
    }
    if online.wait_for(|up| *up).await.is_err() {
        std::future::pending::<()>().await;
    }
}
