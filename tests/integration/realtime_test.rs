//! Realtime delivery: duplicate rows, resubscription, typing signals

use crate::common::{test_config, wait_for, Pair};
use assert_matches::assert_matches;
use sponsorlink::client::messaging::ChannelState;
use sponsorlink::client::SubmitOutcome;
use sponsorlink::shared::AppConfig;
use std::time::Duration;

fn typing_config(decay: Duration) -> AppConfig {
    AppConfig::builder()
        .typing_decay(decay)
        .reconnect_delays(Duration::from_millis(10), Duration::from_millis(50))
        .build()
        .expect("valid config")
}

#[tokio::test]
async fn test_replayed_row_is_merged_once() {
    let pair = Pair::new().await;
    let sponsor_view = pair.open_sponsor().await;
    let sponsee_view = pair.open_sponsee().await;

    let outcome = assert_ok!(sponsor_view.submit("Good morning").await);
    let row = assert_matches!(outcome, SubmitOutcome::Sent(row) => row);
    wait_for(&sponsee_view, |s| s.messages.len() == 1).await;

    assert!(pair.backend.replay(&row.id));
    assert!(pair.backend.replay(&row.id));
    // a later row proves the replays were already processed
    assert_ok!(sponsor_view.submit("Coffee later?").await);

    let sponsee = wait_for(&sponsee_view, |s| s.messages.len() >= 2).await;
    assert_bodies!(sponsee, ["Good morning", "Coffee later?"]);
    let sponsor = wait_for(&sponsor_view, |s| s.messages.len() >= 2).await;
    assert_bodies!(sponsor, ["Good morning", "Coffee later?"]);
}

#[tokio::test]
async fn test_channel_resubscribes_after_drop() {
    let pair = Pair::new().await;
    let sponsor_view = pair.open_sponsor().await;
    let sponsee_view = pair.open_sponsee().await;

    pair.backend.drop_subscriptions();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sponsee_view.message_channel().state(), ChannelState::Active);

    assert_ok!(sponsor_view.submit("Did this reach you?").await);
    let snapshot = wait_for(&sponsee_view, |s| s.messages.len() == 1).await;
    assert_eq!(snapshot.messages[0].body, "Did this reach you?");
}

#[tokio::test]
async fn test_channel_recovers_from_backend_outage() {
    let pair = Pair::new().await;
    let sponsor_view = pair.open_sponsor().await;
    let sponsee_view = pair.open_sponsee().await;

    pair.backend.set_reachable(false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_ne!(sponsee_view.message_channel().state(), ChannelState::Active);

    pair.backend.set_reachable(true);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sponsee_view.message_channel().state(), ChannelState::Active);

    assert_ok!(sponsor_view.submit("Back online").await);
    wait_for(&sponsee_view, |s| s.messages.len() == 1).await;
}

#[tokio::test]
async fn test_closed_conversation_stops_delivery() {
    let pair = Pair::new().await;
    let sponsor_view = pair.open_sponsor().await;
    let sponsee_view = pair.open_sponsee().await;

    assert!(pair.sponsee.messenger.close_conversation(pair.conversation_id));
    assert_eq!(sponsee_view.message_channel().state(), ChannelState::Closed);
    assert_eq!(sponsee_view.typing_channel().state(), ChannelState::Closed);

    assert_ok!(sponsor_view.submit("Anyone there?").await);
    wait_for(&sponsor_view, |s| s.messages.len() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sponsee_view.snapshot().messages.is_empty());
}

#[tokio::test]
async fn test_typing_indicator_decays() {
    let pair = Pair::with_config(typing_config(Duration::from_millis(150))).await;
    let sponsor_view = pair.open_sponsor().await;
    let sponsee_view = pair.open_sponsee().await;

    sponsee_view.send_typing(true).await;
    wait_for(&sponsor_view, |s| s.counterpart_typing).await;
    // no stop signal was sent; the indicator clears on its own
    wait_for(&sponsor_view, |s| !s.counterpart_typing).await;
    assert!(!sponsee_view.snapshot().counterpart_typing);
}

#[tokio::test]
async fn test_typing_stop_clears_indicator() {
    let pair = Pair::with_config(typing_config(Duration::from_secs(60))).await;
    let sponsor_view = pair.open_sponsor().await;
    let sponsee_view = pair.open_sponsee().await;

    sponsee_view.send_typing(true).await;
    wait_for(&sponsor_view, |s| s.counterpart_typing).await;
    sponsee_view.send_typing(false).await;
    wait_for(&sponsor_view, |s| !s.counterpart_typing).await;
}

#[tokio::test]
async fn test_own_typing_is_not_shown() {
    let pair = Pair::with_config(test_config()).await;
    let sponsor_view = pair.open_sponsor().await;
    let sponsee_view = pair.open_sponsee().await;

    sponsor_view.send_typing(true).await;
    wait_for(&sponsee_view, |s| s.counterpart_typing).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!sponsor_view.snapshot().counterpart_typing);
}
