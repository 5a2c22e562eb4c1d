//! Offline queue flows: queue while offline, drain on reconnect, give up
//! after the attempt limit.

use crate::common::{all_persisted, eventually, test_config, wait_for, Pair};
use assert_matches::assert_matches;
use sponsorlink::client::SubmitOutcome;
use sponsorlink::shared::{AppConfig, MessageStatus, SendError};
use std::time::Duration;

#[tokio::test]
async fn test_offline_messages_flush_in_order() {
    let pair = Pair::new().await;
    let sponsor_view = pair.open_sponsor().await;
    let sponsee_view = pair.open_sponsee().await;
    assert_eq!(sponsee_view.snapshot().unread_count, 0);

    pair.sponsor.network.set_online(false);
    let first = assert_ok!(sponsor_view.submit("Hello").await);
    let second = assert_ok!(sponsor_view.submit("How are you?").await);
    assert_matches!(first, SubmitOutcome::Queued(_));
    assert_matches!(second, SubmitOutcome::Queued(_));

    let offline = sponsor_view.snapshot();
    assert_bodies!(offline, ["Hello", "How are you?"]);
    assert!(offline.messages.iter().all(|m| m.status == MessageStatus::Queued));
    assert_eq!(pair.sponsor.messenger.pending_count(), 2);
    assert!(pair.backend.rows_for(pair.conversation_id).is_empty());

    pair.sponsor.network.set_online(true);

    let sponsor_snapshot = wait_for(&sponsor_view, |s| s.messages.len() == 2 && all_persisted(s)).await;
    let sponsee_snapshot = wait_for(&sponsee_view, |s| s.messages.len() == 2).await;

    assert_bodies!(sponsor_snapshot, ["Hello", "How are you?"]);
    assert_bodies!(sponsee_snapshot, ["Hello", "How are you?"]);
    assert_eq!(sponsee_snapshot.unread_count, 2);
    assert_eq!(sponsee_snapshot.last_message_preview.as_deref(), Some("How are you?"));
    assert_eq!(pair.sponsor.messenger.pending_count(), 0);

    let stored: Vec<String> = pair
        .backend
        .rows_for(pair.conversation_id)
        .into_iter()
        .map(|m| m.body)
        .collect();
    assert_eq!(stored, vec!["Hello", "How are you?"]);
}

#[tokio::test]
async fn test_flushed_message_appears_once_for_sender() {
    let pair = Pair::new().await;
    let sponsor_view = pair.open_sponsor().await;

    pair.sponsor.network.set_online(false);
    assert_ok!(sponsor_view.submit("Just checking in").await);
    pair.sponsor.network.set_online(true);

    let snapshot = wait_for(&sponsor_view, |s| all_persisted(s) && !s.messages.is_empty()).await;
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].status, MessageStatus::Sent);

    // push notices go out once per persisted message, in the background
    eventually(|| !pair.backend.notices().is_empty()).await;
    let notices = pair.backend.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].sender_name, "Jordan");
    assert_eq!(notices[0].recipient_id, pair.sponsee.user_id);
}

#[tokio::test]
async fn test_queued_message_fails_after_attempt_limit() {
    let pair = Pair::new().await;
    let sponsor_view = pair.open_sponsor().await;
    let sponsee_view = pair.open_sponsee().await;

    pair.sponsor.network.set_online(false);
    let queued = assert_ok!(sponsor_view.submit("Are we still on for Friday?").await);
    let bubble_id = assert_matches!(queued, SubmitOutcome::Queued(id) => id);

    // drive flushes by hand from here on
    pair.sponsor.messenger.queue().detach_network();
    for _ in 0..3 {
        pair.backend.fail_next_insert(SendError::transient("flaky"));
    }

    let first = pair.sponsor.messenger.flush().await;
    assert_eq!((first.attempted, first.retrying, first.failed), (1, 1, 0));
    pair.sponsor.messenger.flush().await;
    let last = pair.sponsor.messenger.flush().await;
    assert_eq!((last.attempted, last.retrying, last.failed), (1, 0, 1));

    let snapshot = wait_for(&sponsor_view, |s| {
        s.messages.first().map(|m| m.status) == Some(MessageStatus::Failed)
    })
    .await;
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].id, bubble_id);
    assert_eq!(pair.sponsor.messenger.pending_count(), 0);
    assert_eq!(pair.sponsor.messenger.failed_for(pair.conversation_id).len(), 1);
    assert_eq!(pair.backend.insert_attempts(), 3);

    // a failed bubble can be sent again by hand
    pair.sponsor.network.set_online(true);
    let resent = assert_ok!(sponsor_view.retry(&bubble_id).await);
    let row = assert_matches!(resent, SubmitOutcome::Sent(row) => row);
    assert_eq!(row.body, "Are we still on for Friday?");
    assert!(pair.sponsor.messenger.failed_for(pair.conversation_id).is_empty());

    let snapshot = wait_for(&sponsor_view, |s| s.messages.len() == 1 && all_persisted(s)).await;
    assert_eq!(snapshot.messages[0].id, row.id);
    wait_for(&sponsee_view, |s| s.messages.len() == 1).await;

    // only failed bubbles qualify
    assert_err!(sponsor_view.retry(&row.id).await, SendError::Validation { .. });
}

#[tokio::test]
async fn test_failed_bubble_survives_reopen_and_can_be_discarded() {
    let config = AppConfig::builder()
        .max_send_attempts(1)
        .reconnect_delays(Duration::from_millis(10), Duration::from_millis(50))
        .build()
        .expect("valid config");
    let pair = Pair::with_config(config).await;
    let sponsor_view = pair.open_sponsor().await;

    pair.sponsor.network.set_online(false);
    assert_ok!(sponsor_view.submit("See you at the meeting").await);
    pair.sponsor.messenger.queue().detach_network();
    pair.backend.fail_next_insert(SendError::transient("timeout"));

    let report = pair.sponsor.messenger.flush().await;
    assert_eq!(report.failed, 1);
    wait_for(&sponsor_view, |s| {
        s.messages.iter().any(|m| m.status == MessageStatus::Failed)
    })
    .await;

    assert!(pair.sponsor.messenger.close_conversation(pair.conversation_id));
    assert!(sponsor_view.is_closed());
    let reopened = pair.open_sponsor().await;
    let snapshot = reopened.snapshot();
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].status, MessageStatus::Failed);
    assert_eq!(snapshot.messages[0].body, "See you at the meeting");

    let failed_id = snapshot.messages[0].id.clone();
    assert_ok!(reopened.discard(&failed_id));
    assert!(reopened.snapshot().messages.is_empty());
    assert!(pair.sponsor.messenger.failed_for(pair.conversation_id).is_empty());
    assert_err!(reopened.discard(&failed_id), SendError::Validation { .. });
}

#[tokio::test]
async fn test_queue_stats_follow_pending_work() {
    let pair = Pair::with_config(test_config()).await;
    let sponsor_view = pair.open_sponsor().await;

    pair.sponsor.network.set_online(false);
    assert_ok!(sponsor_view.submit("one").await);
    assert_ok!(sponsor_view.submit("two").await);

    let stats = pair.sponsor.messenger.queue().stats();
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.retrying, 0);
    let oldest = stats.oldest_enqueued_at.expect("queue is not empty");
    let pending = pair.sponsor.messenger.queue().pending_for(pair.conversation_id);
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].enqueued_at, oldest);
    assert_eq!(pending[0].body, "one");
}
