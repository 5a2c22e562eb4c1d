//! Common test utilities and helpers
//!
//! Two signed-in peers share one loopback backend, each with its own
//! network monitor and local store. Wait helpers poll with a deadline so a
//! broken flow fails the test instead of hanging it.


use sponsorlink::backend::{LoopbackBackend, StaticAuth};
use sponsorlink::client::collaborators::KeyValueStore;
use sponsorlink::client::local_db::MemoryStore;
use sponsorlink::client::messaging::{ChannelHandle, ChannelState};
use sponsorlink::client::offline::ConversationSnapshot;
use sponsorlink::client::{Collaborators, ConversationSession, Messenger, NetworkMonitor};
use sponsorlink::shared::AppConfig;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// How long any wait helper waits before failing the test
pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Config with short reconnect delays
pub fn test_config() -> AppConfig {
    AppConfig::builder()
        .reconnect_delays(Duration::from_millis(10), Duration::from_millis(50))
        .build()
        .expect("test config is valid")
}

/// One signed-in client
pub struct Peer {
    pub user_id: Uuid,
    pub messenger: Messenger,
    pub network: NetworkMonitor,
    pub auth: Arc<StaticAuth>,
}

impl Peer {
    pub async fn start(backend: &LoopbackBackend, name: &str, store: Arc<dyn KeyValueStore>) -> Self {
        Self::start_with(backend, Uuid::new_v4(), name, store, test_config(), NetworkMonitor::new()).await
    }

    pub async fn start_with(
        backend: &LoopbackBackend,
        user_id: Uuid,
        name: &str,
        store: Arc<dyn KeyValueStore>,
        config: AppConfig,
        network: NetworkMonitor,
    ) -> Self {
        let auth = Arc::new(StaticAuth::signed_in(user_id, Some(name)));
        let collaborators = Collaborators {
            auth: auth.clone(),
            backend: Arc::new(backend.clone()),
            transport: Arc::new(backend.clone()),
            notifier: Arc::new(backend.clone()),
            store,
        };
        let messenger = Messenger::start(config, collaborators, network.clone())
            .await
            .expect("messenger starts");
        Self {
            user_id,
            messenger,
            network,
            auth,
        }
    }

    /// Open a conversation and wait until both channels are live
    pub async fn open(&self, conversation_id: Uuid, recipient_id: Uuid) -> Arc<ConversationSession> {
        let session = self
            .messenger
            .open_conversation(conversation_id, recipient_id)
            .await
            .expect("conversation opens");
        wait_active(session.message_channel()).await;
        wait_active(session.typing_channel()).await;
        session
    }
}

/// A sponsor and a sponsee sharing one conversation
pub struct Pair {
    pub backend: LoopbackBackend,
    pub conversation_id: Uuid,
    pub sponsor: Peer,
    pub sponsee: Peer,
}

impl Pair {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let backend = LoopbackBackend::new();
        let sponsor = Peer::start_with(
            &backend,
            Uuid::new_v4(),
            "Jordan",
            Arc::new(MemoryStore::new()),
            config.clone(),
            NetworkMonitor::new(),
        )
        .await;
        let sponsee = Peer::start_with(
            &backend,
            Uuid::new_v4(),
            "Riley",
            Arc::new(MemoryStore::new()),
            config,
            NetworkMonitor::new(),
        )
        .await;
        Self {
            backend,
            conversation_id: Uuid::new_v4(),
            sponsor,
            sponsee,
        }
    }

    pub async fn open_sponsor(&self) -> Arc<ConversationSession> {
        self.sponsor.open(self.conversation_id, self.sponsee.user_id).await
    }

    pub async fn open_sponsee(&self) -> Arc<ConversationSession> {
        self.sponsee.open(self.conversation_id, self.sponsor.user_id).await
    }
}

/// Wait until a channel reports `Active`
pub async fn wait_active(handle: &ChannelHandle) {
    let mut status = handle.status();
    tokio::time::timeout(WAIT_LIMIT, status.wait_for(|state| *state == ChannelState::Active))
        .await
        .expect("channel became active in time")
        .expect("channel state sender alive");
}

/// Wait until the session's snapshot satisfies `done`, and return it
pub async fn wait_for(
    session: &ConversationSession,
    done: impl Fn(&ConversationSnapshot) -> bool,
) -> ConversationSnapshot {
    let mut updates = session.updates();
    tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            let snapshot = session.snapshot();
            if done(&snapshot) {
                return snapshot;
            }
            updates.changed().await.expect("session still alive");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("condition not reached; last snapshot: {:?}", session.snapshot()))
}

/// Poll `done` until it holds
pub async fn eventually(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT_LIMIT, async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

/// Whether every message in the snapshot is a server row
pub fn all_persisted(snapshot: &ConversationSnapshot) -> bool {
    snapshot.messages.iter().all(|m| !m.id.is_provisional())
}
