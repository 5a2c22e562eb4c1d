//! Offline messaging demo
//!
//! Runs a sponsor and a sponsee against one in-process backend: the sponsor
//! writes two messages while offline, reconnects, and both sides watch the
//! queue drain into the conversation in order.

use sponsorlink::backend::{LoopbackBackend, StaticAuth};
use sponsorlink::client::collaborators::KeyValueStore;
use sponsorlink::client::local_db::{LocalDatabase, MemoryStore};
use sponsorlink::client::offline::ConversationSnapshot;
use sponsorlink::client::{Collaborators, Config, ConversationSession, Messenger, NetworkMonitor};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const WAIT_LIMIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    let config = Config::from_env()?;
    let backend = LoopbackBackend::new();
    let sponsor_id = Uuid::new_v4();
    let sponsee_id = Uuid::new_v4();
    let conversation_id = Uuid::new_v4();

    let sponsor_db = LocalDatabase::open(config.db_path()).await?;
    tracing::info!("[DEMO] Sponsor queue stored at {}", config.db_path().display());
    let sponsor_network = NetworkMonitor::new();
    let sponsor = Messenger::start(
        config.app().clone(),
        collaborators(&backend, sponsor_id, "Jordan", Arc::new(sponsor_db.clone())),
        sponsor_network.clone(),
    )
    .await?;

    let sponsee = Messenger::start(
        config.app().clone(),
        collaborators(&backend, sponsee_id, "Riley", Arc::new(MemoryStore::new())),
        NetworkMonitor::new(),
    )
    .await?;

    let sponsor_view = sponsor.open_conversation(conversation_id, sponsee_id).await?;
    let sponsee_view = sponsee.open_conversation(conversation_id, sponsor_id).await?;
    let unread_before = sponsee_view.snapshot().unread_count;

    sponsor_network.set_online(false);
    sponsor_view.submit("Hello").await?;
    sponsor_view.submit("How are you?").await?;
    log_view("sponsor (offline)", &sponsor_view.snapshot());
    tracing::info!("[DEMO] {} message(s) waiting in the queue", sponsor.pending_count());

    sponsor_network.set_online(true);
    wait_for(&sponsor_view, |s| {
        s.messages.len() == 2 && s.messages.iter().all(|m| !m.id.is_provisional())
    })
    .await;
    wait_for(&sponsee_view, |s| s.messages.len() == 2).await;

    log_view("sponsor (reconnected)", &sponsor_view.snapshot());
    let sponsee_snapshot = sponsee_view.snapshot();
    log_view("sponsee", &sponsee_snapshot);
    tracing::info!(
        "[DEMO] Sponsee unread count went from {} to {}",
        unread_before,
        sponsee_snapshot.unread_count
    );

    sponsee_view.send_typing(true).await;
    wait_for(&sponsor_view, |s| s.counterpart_typing).await;
    tracing::info!("[DEMO] Sponsor sees the sponsee typing");

    sponsor.close_all();
    sponsee.close_all();
    sponsor_db.close().await;
    Ok(())
}

fn collaborators(
    backend: &LoopbackBackend,
    user: Uuid,
    name: &str,
    store: Arc<dyn KeyValueStore>,
) -> Collaborators {
    Collaborators {
        auth: Arc::new(StaticAuth::signed_in(user, Some(name))),
        backend: Arc::new(backend.clone()),
        transport: Arc::new(backend.clone()),
        notifier: Arc::new(backend.clone()),
        store,
    }
}

async fn wait_for(session: &ConversationSession, done: impl Fn(&ConversationSnapshot) -> bool) {
    let mut updates = session.updates();
    let waited = tokio::time::timeout(WAIT_LIMIT, async {
        while !done(&session.snapshot()) {
            if updates.changed().await.is_err() {
                break;
            }
        }
    })
    .await;
    if waited.is_err() {
        tracing::warn!("[DEMO] Gave up waiting on conversation {}", session.conversation_id());
    }
}

fn log_view(label: &str, snapshot: &ConversationSnapshot) {
    for message in &snapshot.messages {
        tracing::info!("[DEMO] {}: {:?} {:?} ({})", label, message.status, message.body, message.id);
    }
}
