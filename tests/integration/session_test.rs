//! Conversation session flows while online: optimistic send, rollback,
//! history and read receipts, lifecycle.

use crate::common::{all_persisted, eventually, wait_for, Pair};
use assert_matches::assert_matches;
use sponsorlink::client::collaborators::ReadTarget;
use sponsorlink::client::SubmitOutcome;
use sponsorlink::shared::{MessageStatus, NewMessage, SendError};
use std::sync::Arc;

#[tokio::test]
async fn test_online_send_replaces_bubble_with_row() {
    let pair = Pair::new().await;
    let sponsor_view = pair.open_sponsor().await;
    let sponsee_view = pair.open_sponsee().await;

    let outcome = assert_ok!(sponsor_view.submit("Proud of you this week").await);
    let row = assert_matches!(outcome, SubmitOutcome::Sent(row) => row);
    assert!(!row.id.is_provisional());

    let snapshot = sponsor_view.snapshot();
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].id, row.id);
    assert_eq!(snapshot.messages[0].status, MessageStatus::Sent);
    assert_eq!(snapshot.unread_count, 0);

    let received = wait_for(&sponsee_view, |s| s.messages.len() == 1).await;
    assert_eq!(received.messages[0].id, row.id);
    assert_eq!(received.unread_count, 1);
}

#[tokio::test]
async fn test_rejected_send_restores_draft() {
    let pair = Pair::new().await;
    let sponsor_view = pair.open_sponsor().await;
    pair.backend.fail_next_insert(SendError::backend(400, "recipient blocked"));

    let outcome = assert_ok!(sponsor_view.submit("Call me later").await);
    let (draft, error) = assert_matches!(outcome, SubmitOutcome::RolledBack { draft, error } => (draft, error));
    assert_eq!(draft, "Call me later");
    assert_matches!(error, SendError::Backend { code: 400, .. });

    let snapshot = sponsor_view.snapshot();
    assert!(snapshot.messages.is_empty());
    assert_eq!(snapshot.draft.as_deref(), Some("Call me later"));
    assert_contains!(snapshot.send_error.as_deref().unwrap_or_default(), "400");
    assert_eq!(pair.sponsor.messenger.pending_count(), 0);

    assert_eq!(sponsor_view.take_draft().as_deref(), Some("Call me later"));
    assert!(sponsor_view.dismiss_error());
    let cleared = sponsor_view.snapshot();
    assert_eq!(cleared.draft, None);
    assert_eq!(cleared.send_error, None);
}

#[tokio::test]
async fn test_transient_failure_falls_back_to_queue() {
    let pair = Pair::new().await;
    let sponsor_view = pair.open_sponsor().await;
    pair.backend.fail_next_insert(SendError::transient("connection reset"));

    let outcome = assert_ok!(sponsor_view.submit("Still there?").await);
    assert_matches!(outcome, SubmitOutcome::Queued(_));

    // the enqueue itself kicks off a flush while online
    let snapshot = wait_for(&sponsor_view, |s| s.messages.len() == 1 && all_persisted(s)).await;
    assert_eq!(snapshot.messages[0].body, "Still there?");
    assert_eq!(pair.backend.rows_for(pair.conversation_id).len(), 1);
    eventually(|| pair.sponsor.messenger.pending_count() == 0).await;
}

#[tokio::test]
async fn test_signed_out_send_is_an_error() {
    let pair = Pair::new().await;
    let sponsor_view = pair.open_sponsor().await;
    pair.sponsor.auth.sign_out();

    assert_err!(sponsor_view.submit("Hello?").await, SendError::Unauthenticated);
    let snapshot = sponsor_view.snapshot();
    assert!(snapshot.messages.is_empty());
    assert_eq!(snapshot.draft.as_deref(), Some("Hello?"));
    assert!(pair.backend.rows().is_empty());

    let other = uuid::Uuid::new_v4();
    assert_err!(
        pair.sponsor.messenger.open_conversation(other, pair.sponsee.user_id).await,
        SendError::Unauthenticated
    );
}

#[tokio::test]
async fn test_invalid_text_never_leaves_the_device() {
    let pair = Pair::new().await;
    let sponsor_view = pair.open_sponsor().await;
    let too_long = "x".repeat(pair.sponsor.messenger.config().max_message_len + 1);

    assert_err!(sponsor_view.submit("   ").await, SendError::Validation { .. });
    assert_err!(sponsor_view.submit(too_long).await, SendError::Validation { .. });

    pair.sponsor.network.set_online(false);
    assert_err!(sponsor_view.submit("").await, SendError::Validation { .. });

    assert!(sponsor_view.snapshot().messages.is_empty());
    assert_eq!(pair.sponsor.messenger.pending_count(), 0);
    assert_eq!(pair.backend.insert_attempts(), 0);
}

#[tokio::test]
async fn test_open_seeds_history_and_marks_read() {
    let pair = Pair::new().await;
    for body in ["Welcome aboard", "Text me any time"] {
        pair.backend.seed(NewMessage {
            conversation_id: pair.conversation_id,
            sender_id: pair.sponsor.user_id,
            recipient_id: pair.sponsee.user_id,
            body: body.to_string(),
        });
    }
    assert_eq!(pair.backend.unread_for(pair.sponsee.user_id), 2);

    let sponsee_view = pair.open_sponsee().await;
    let snapshot = wait_for(&sponsee_view, |s| s.messages.len() == 2 && s.unread_count == 0).await;
    assert_bodies!(snapshot, ["Welcome aboard", "Text me any time"]);
    assert!(snapshot.messages.iter().all(|m| m.read_at.is_some()));

    assert_eq!(pair.backend.unread_for(pair.sponsee.user_id), 0);
    assert_eq!(
        pair.backend.read_requests(),
        vec![ReadTarget::Conversation {
            conversation_id: pair.conversation_id,
            reader_id: pair.sponsee.user_id,
        }]
    );
}

#[tokio::test]
async fn test_mark_all_read_after_new_messages() {
    let pair = Pair::new().await;
    let sponsor_view = pair.open_sponsor().await;
    let sponsee_view = pair.open_sponsee().await;

    assert_ok!(sponsor_view.submit("First").await);
    assert_ok!(sponsor_view.submit("Second").await);
    wait_for(&sponsee_view, |s| s.unread_count == 2).await;

    let stamped = assert_ok!(sponsee_view.mark_all_read().await);
    assert_eq!(stamped, 2);
    assert_eq!(sponsee_view.snapshot().unread_count, 0);
    assert_eq!(pair.backend.unread_for(pair.sponsee.user_id), 0);
}

#[tokio::test]
async fn test_conversation_lifecycle() {
    let pair = Pair::new().await;
    let first = pair.open_sponsor().await;
    let again = pair.open_sponsor().await;
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(pair.sponsor.messenger.open_conversations(), vec![pair.conversation_id]);

    assert!(pair.sponsor.messenger.close_conversation(pair.conversation_id));
    assert!(!pair.sponsor.messenger.close_conversation(pair.conversation_id));
    assert!(first.is_closed());
    assert!(pair.sponsor.messenger.open_conversations().is_empty());

    assert_err!(first.submit("anyone?").await, SendError::Validation { .. });
    assert_err!(
        pair.sponsor.messenger.submit(pair.conversation_id, "anyone?").await,
        SendError::Validation { .. }
    );

    let reopened = pair.open_sponsor().await;
    assert!(!Arc::ptr_eq(&first, &reopened));
    assert_matches!(
        assert_ok!(pair.sponsor.messenger.submit(pair.conversation_id, "back again").await),
        SubmitOutcome::Sent(_)
    );

    pair.sponsor.messenger.close_all();
    assert!(reopened.is_closed());
}
