//! Queue durability across restarts, with the SQLite store on disk

use crate::common::{all_persisted, test_config, wait_for, Peer};
use sponsorlink::backend::LoopbackBackend;
use sponsorlink::client::collaborators::KeyValueStore;
use sponsorlink::client::local_db::{LocalDatabase, MemoryStore};
use sponsorlink::client::NetworkMonitor;
use sponsorlink::shared::{MessageStatus, NewMessage};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_queued_messages_survive_restart() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("local.db");
    let backend = LoopbackBackend::new();
    let sponsor_id = Uuid::new_v4();
    let sponsee_id = Uuid::new_v4();
    let conversation_id = Uuid::new_v4();

    {
        let db = assert_ok!(LocalDatabase::open(&path).await);
        let sponsor = Peer::start_with(
            &backend,
            sponsor_id,
            "Jordan",
            Arc::new(db.clone()),
            test_config(),
            NetworkMonitor::with_initial(false),
        )
        .await;
        let view = sponsor.open(conversation_id, sponsee_id).await;
        assert_ok!(view.submit("Hello").await);
        assert_ok!(view.submit("How are you?").await);
        assert_eq!(sponsor.messenger.pending_count(), 2);

        let stored = assert_ok!(db.get(&test_config().queue_storage_key).await);
        assert!(stored.is_some());

        sponsor.messenger.close_all();
        drop(view);
        drop(sponsor);
        db.close().await;
    }
    assert!(backend.rows().is_empty());

    // next launch comes up offline and shows what is still waiting
    let db = assert_ok!(LocalDatabase::open(&path).await);
    let network = NetworkMonitor::with_initial(false);
    let sponsor = Peer::start_with(
        &backend,
        sponsor_id,
        "Jordan",
        Arc::new(db.clone()),
        test_config(),
        network.clone(),
    )
    .await;
    assert_eq!(sponsor.messenger.pending_count(), 2);

    let view = sponsor.open(conversation_id, sponsee_id).await;
    let reseeded = view.snapshot();
    assert_bodies!(reseeded, ["Hello", "How are you?"]);
    assert!(reseeded.messages.iter().all(|m| m.status == MessageStatus::Queued));

    network.set_online(true);
    let flushed = wait_for(&view, |s| s.messages.len() == 2 && all_persisted(s)).await;
    assert_bodies!(flushed, ["Hello", "How are you?"]);
    assert_eq!(sponsor.messenger.pending_count(), 0);

    let stored: Vec<String> = backend.rows().into_iter().map(|m| m.body).collect();
    assert_eq!(stored, vec!["Hello", "How are you?"]);
    let key = test_config().queue_storage_key;
    assert_eq!(assert_ok!(db.get(&key).await), None);
}

#[tokio::test]
async fn test_restart_online_flushes_without_opening_conversation() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("local.db");
    let backend = LoopbackBackend::new();
    let sponsor_id = Uuid::new_v4();
    let sponsee_id = Uuid::new_v4();
    let conversation_id = Uuid::new_v4();

    {
        let db = assert_ok!(LocalDatabase::open(&path).await);
        let sponsor = Peer::start_with(
            &backend,
            sponsor_id,
            "Jordan",
            Arc::new(db.clone()),
            test_config(),
            NetworkMonitor::with_initial(false),
        )
        .await;
        assert_ok!(sponsor.messenger.queue().enqueue(conversation_id, sponsee_id, "Queued before restart").await);
        drop(sponsor);
        db.close().await;
    }

    let sponsee = Peer::start_with(
        &backend,
        sponsee_id,
        "Riley",
        Arc::new(MemoryStore::new()),
        test_config(),
        NetworkMonitor::new(),
    )
    .await;
    let sponsee_view = sponsee.open(conversation_id, sponsor_id).await;

    let db = assert_ok!(LocalDatabase::open(&path).await);
    let _sponsor = Peer::start_with(
        &backend,
        sponsor_id,
        "Jordan",
        Arc::new(db),
        test_config(),
        NetworkMonitor::new(),
    )
    .await;

    let snapshot = wait_for(&sponsee_view, |s| s.messages.len() == 1).await;
    assert_eq!(snapshot.messages[0].body, "Queued before restart");
    assert_eq!(snapshot.unread_count, 1);
}

#[tokio::test]
async fn test_reopen_places_queued_bubble_among_newer_history() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("local.db");
    let backend = LoopbackBackend::new();
    let sponsor_id = Uuid::new_v4();
    let sponsee_id = Uuid::new_v4();
    let conversation_id = Uuid::new_v4();

    {
        let db = assert_ok!(LocalDatabase::open(&path).await);
        let sponsor = Peer::start_with(
            &backend,
            sponsor_id,
            "Jordan",
            Arc::new(db.clone()),
            test_config(),
            NetworkMonitor::with_initial(false),
        )
        .await;
        assert_ok!(sponsor.messenger.queue().enqueue(conversation_id, sponsee_id, "queued early").await);
        drop(sponsor);
        db.close().await;
    }

    // the counterpart answers while the sponsor's app is closed
    tokio::time::sleep(Duration::from_millis(20)).await;
    backend.seed(NewMessage {
        conversation_id,
        sender_id: sponsee_id,
        recipient_id: sponsor_id,
        body: "reply later".to_string(),
    });

    let db = assert_ok!(LocalDatabase::open(&path).await);
    let network = NetworkMonitor::with_initial(false);
    let sponsor = Peer::start_with(
        &backend,
        sponsor_id,
        "Jordan",
        Arc::new(db),
        test_config(),
        network.clone(),
    )
    .await;
    let view = sponsor.open(conversation_id, sponsee_id).await;

    let reopened = view.snapshot();
    assert_bodies!(reopened, ["queued early", "reply later"]);
    assert_eq!(reopened.messages[0].status, MessageStatus::Queued);
    assert!(is_sorted(&reopened));

    network.set_online(true);
    let flushed = wait_for(&view, |s| s.messages.len() == 2 && all_persisted(s)).await;
    assert!(is_sorted(&flushed));
    assert_eq!(sponsor.messenger.pending_count(), 0);
}

fn is_sorted(snapshot: &sponsorlink::client::ConversationSnapshot) -> bool {
    snapshot
        .messages
        .windows(2)
        .all(|pair| pair[0].created_at <= pair[1].created_at)
}
