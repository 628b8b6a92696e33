//! Negotiation-safety tests: a probe connection poses as a remote peer and
//! drives the channel with raw signaling payloads.

mod common;

use std::time::Duration;

use serde_json::json;
use signal_bus::LocalHub;
use tokio::time::sleep;

use common::{settle, wait_for, Probe, RecordingEvents, TestClient};
use cove::EngineError;

const ROOM: &str = "room";

fn offer_from(peer: &str, target: &str) -> serde_json::Value {
    json!({
        "m": "rtcOffer",
        "fc": target,
        "fp": peer,
        "o": {"type": "offer", "sdp": "v=0 probe-offer"},
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn presence_flood_produces_a_single_stream_request() {
    let hub = LocalHub::new();
    let alice = TestClient::new(&hub, "alice");
    alice.ctx.set_mute(false).await.expect("unmute");
    let _channel = alice.join(ROOM, "Alice", RecordingEvents::new());
    let probe = Probe::new(&hub, ROOM);

    wait_for("first announce", || {
        !probe.seen_from("imActive", "alice").is_empty()
    })
    .await;

    for _ in 0..5 {
        probe.publish(json!({"m": "imActive", "c": "bob", "u": "Bob"}));
    }
    settle().await;

    assert_eq!(probe.seen_from("streamReq", "alice").len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_offers_yield_one_session_and_one_answer() {
    let hub = LocalHub::new();
    let alice = TestClient::new(&hub, "alice");
    let _channel = alice.join(ROOM, "Alice", RecordingEvents::new());
    let probe = Probe::new(&hub, ROOM);
    settle().await;

    probe.publish(offer_from("bob", "alice"));
    wait_for("answer", || {
        !probe.seen_from("rtcAns", "alice").is_empty()
    })
    .await;
    probe.publish(offer_from("bob", "alice"));
    settle().await;

    assert_eq!(alice.media.session_count(), 1);
    assert_eq!(probe.seen_from("rtcAns", "alice").len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_requests_are_ignored_before_the_first_announce() {
    let hub = LocalHub::new();
    // Never unmuted, so this client has never announced with live capture.
    let carol = TestClient::new(&hub, "carol");
    let _channel = carol.join(ROOM, "Carol", RecordingEvents::new());
    let probe = Probe::new(&hub, ROOM);
    settle().await;

    probe.publish(json!({"m": "streamReq", "c": "bob", "u": "Bob", "p": "carol"}));
    settle().await;

    assert_eq!(carol.media.session_count(), 0);
    assert!(probe.seen_from("rtcOffer", "carol").is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn early_candidates_are_buffered_until_the_offer_lands() {
    let hub = LocalHub::new();
    let alice = TestClient::new(&hub, "alice");
    let _channel = alice.join(ROOM, "Alice", RecordingEvents::new());
    let probe = Probe::new(&hub, ROOM);
    settle().await;

    probe.publish(json!({
        "m": "iceCand",
        "fc": "alice",
        "fp": "bob",
        "i": {"candidate": "candidate:probe-0", "sdpMid": "0", "sdpMLineIndex": 0},
    }));
    settle().await;
    assert_eq!(alice.media.session_count(), 0);

    probe.publish(offer_from("bob", "alice"));
    wait_for("buffered candidate applied", || {
        alice
            .media
            .sessions()
            .first()
            .map(|s| s.candidate_count() == 1)
            .unwrap_or(false)
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn a_leave_notice_tears_the_peer_down() {
    let hub = LocalHub::new();
    let alice = TestClient::new(&hub, "alice");
    let channel = alice.join(ROOM, "Alice", RecordingEvents::new());
    let probe = Probe::new(&hub, ROOM);
    settle().await;

    probe.publish(offer_from("bob", "alice"));
    wait_for("peer in lobby", || channel.lobby_listing().len() == 2).await;

    probe.publish(json!({"m": "disconnectng", "c": "bob", "u": "Bob"}));
    wait_for("peer removed", || channel.lobby_listing().len() == 1).await;
    assert!(alice.media.sessions()[0].is_closed());
    assert_eq!(channel.lobby_listing()[0].client.as_str(), "alice");
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_publishes_exactly_one_leave_notice() {
    let hub = LocalHub::new();
    let alice = TestClient::new(&hub, "alice");
    let channel = alice.join(ROOM, "Alice", RecordingEvents::new());
    let probe = Probe::new(&hub, ROOM);
    settle().await;

    channel.shutdown().await;
    settle().await;

    assert_eq!(probe.seen_from("disconnectng", "alice").len(), 1);
    assert_eq!(alice.ctx.channel_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn a_timed_out_stream_request_is_retried_on_the_next_announce() {
    let hub = LocalHub::new();
    let alice = TestClient::new(&hub, "alice");
    alice.ctx.set_mute(false).await.expect("unmute");
    let _channel = alice.join(ROOM, "Alice", RecordingEvents::new());
    let probe = Probe::new(&hub, ROOM);
    wait_for("first announce", || {
        !probe.seen_from("imActive", "alice").is_empty()
    })
    .await;

    probe.publish(json!({"m": "imActive", "c": "bob", "u": "Bob"}));
    wait_for("first stream request", || {
        probe.seen_from("streamReq", "alice").len() == 1
    })
    .await;

    // Past the negotiation timeout the guard is cleared, so a fresh
    // announce from the still-silent peer asks again.
    sleep(Duration::from_millis(650)).await;
    probe.publish(json!({"m": "imActive", "c": "bob", "u": "Bob"}));
    wait_for("retried stream request", || {
        probe.seen_from("streamReq", "alice").len() == 2
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn a_zero_track_capture_is_reacquired_before_streaming() {
    let hub = LocalHub::new();
    let alice = TestClient::new(&hub, "alice");
    alice.ctx.set_mute(false).await.expect("unmute");
    let _channel = alice.join(ROOM, "Alice", RecordingEvents::new());
    let probe = Probe::new(&hub, ROOM);
    wait_for("first announce", || {
        !probe.seen_from("imActive", "alice").is_empty()
    })
    .await;

    // The stream goes away and the next acquisition comes up empty, so
    // streaming has to reacquire twice before tracks attach.
    alice.ctx.capture().discard_stream();
    alice.capture.set_empty_acquisitions(1);

    probe.publish(json!({"m": "streamReq", "c": "bob", "u": "Bob", "p": "alice"}));
    wait_for("offer after reacquisition", || {
        !probe.seen_from("rtcOffer", "alice").is_empty()
    })
    .await;
    assert_eq!(alice.capture.acquisitions(), 3);
    assert_eq!(alice.media.sessions()[0].track_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn capture_failure_surfaces_through_unmute() {
    let hub = LocalHub::new();
    let dave = TestClient::new(&hub, "dave");
    dave.capture.set_fail(true);
    let err = dave
        .ctx
        .set_mute(false)
        .await
        .expect_err("acquisition should fail");
    assert!(matches!(err, EngineError::Capture(_)));

    dave.capture.set_fail(false);
    dave.ctx.set_mute(false).await.expect("unmute after recovery");
    assert!(!dave.ctx.is_muted());
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_answers_are_ignored_once_applied() {
    let hub = LocalHub::new();
    let alice = TestClient::new(&hub, "alice");
    alice.ctx.set_mute(false).await.expect("unmute");
    let _channel = alice.join(ROOM, "Alice", RecordingEvents::new());
    let probe = Probe::new(&hub, ROOM);
    wait_for("first announce", || {
        !probe.seen_from("imActive", "alice").is_empty()
    })
    .await;

    probe.publish(json!({"m": "streamReq", "c": "bob", "u": "Bob", "p": "alice"}));
    wait_for("offer", || !probe.seen_from("rtcOffer", "alice").is_empty()).await;

    let answer = json!({
        "m": "rtcAns",
        "c": "bob",
        "fc": "alice",
        "a": {"type": "answer", "sdp": "v=0 probe-answer"},
    });
    probe.publish(answer.clone());
    wait_for("answer applied", || {
        alice.media.sessions()[0].remote_description_count() == 1
    })
    .await;
    settle().await;

    probe.publish(answer);
    settle().await;
    assert_eq!(alice.media.sessions()[0].remote_description_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn a_ping_triggers_an_immediate_reannounce() {
    let hub = LocalHub::new();
    let alice = TestClient::new(&hub, "alice");
    alice.ctx.set_mute(false).await.expect("unmute");
    let _channel = alice.join(ROOM, "Alice", RecordingEvents::new());
    let probe = Probe::new(&hub, ROOM);
    wait_for("first announce", || {
        !probe.seen_from("imActive", "alice").is_empty()
    })
    .await;
    let before = probe.seen_from("imActive", "alice").len();

    probe.publish(json!({"m": "doPing"}));
    wait_for("reannounce", || {
        probe.seen_from("imActive", "alice").len() > before
    })
    .await;
}
