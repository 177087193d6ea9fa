//! Hub routing tests
//!
//! Peers are driven by hand over in-memory links so every reply (or the
//! lack of one) is scripted.

mod common;

use common::{init_tracing, wait_for_peer_count, OfferBehavior, TestPeer};
use peerlink_signaling::protocol::error_codes;
use peerlink_signaling::rtc::{IceCandidate, SessionDescription};
use peerlink_signaling::{CandidateRouting, Error, HubConfig, PeerState, SignalingHub};
use std::time::{Duration, Instant};
use tokio::time::timeout;

fn hub_config() -> HubConfig {
    HubConfig::lan_preset()
}

#[tokio::test]
async fn test_broadcast_reaches_only_ready_peers() {
    init_tracing();
    let hub = SignalingHub::new(hub_config());

    let x = TestPeer::join_ready(&hub, OfferBehavior::Hang).await;
    let mut y = TestPeer::join_ready(&hub, OfferBehavior::Answer("y-answer".into())).await;
    let mut z = TestPeer::join(&hub, OfferBehavior::Answer("z-answer".into())).await;
    assert_eq!(hub.peer_state(&z.id).await, Some(PeerState::Initial));

    let entries = timeout(
        Duration::from_secs(2),
        x.hub.broadcast_offer(SessionDescription::offer("x-offer")),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].from_id, y.id);
    assert_eq!(entries[0].description.sdp, "y-answer");

    let offer = y.offers.try_recv().unwrap();
    assert_eq!(offer.from_id, x.id);
    assert_eq!(offer.description.sdp, "x-offer");

    // Z never saw the offer and is still INITIAL
    assert!(z.offers.try_recv().is_err());
    assert_eq!(hub.peer_state(&z.id).await, Some(PeerState::Initial));
}

#[tokio::test]
async fn test_broadcast_with_no_other_peers_is_empty() {
    let hub = SignalingHub::new(hub_config());
    let x = TestPeer::join_ready(&hub, OfferBehavior::Hang).await;

    let entries = x
        .hub
        .broadcast_offer(SessionDescription::offer("alone"))
        .await
        .unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn test_disconnect_mid_broadcast_excludes_peer() {
    init_tracing();
    let hub = SignalingHub::new(hub_config());

    let x = TestPeer::join_ready(&hub, OfferBehavior::Hang).await;
    let y = TestPeer::join_ready(&hub, OfferBehavior::Answer("y-answer".into())).await;
    let mut w = TestPeer::join_ready(&hub, OfferBehavior::Hang).await;
    let y_id = y.id.clone();

    let started = Instant::now();
    let broadcast = tokio::spawn({
        let hub = x.hub.clone();
        async move { hub.broadcast_offer(SessionDescription::offer("x-offer")).await }
    });

    // W has the offer in hand; drop it before it replies
    timeout(Duration::from_secs(1), w.offers.recv())
        .await
        .unwrap()
        .unwrap();
    w.disconnect();

    let entries = timeout(Duration::from_secs(2), broadcast)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].from_id, y_id);

    // Resolved by the disconnect, well before the 10s offer timeout
    assert!(started.elapsed() < Duration::from_secs(5));
    wait_for_peer_count(&hub, 2).await;
}

#[tokio::test]
async fn test_unresponsive_peer_is_cut_off_by_offer_timeout() {
    let hub = SignalingHub::new(hub_config().with_offer_timeout(Duration::from_millis(100)));

    let x = TestPeer::join_ready(&hub, OfferBehavior::Hang).await;
    let y = TestPeer::join_ready(&hub, OfferBehavior::Answer("y-answer".into())).await;
    let _w = TestPeer::join_ready(&hub, OfferBehavior::Hang).await;

    let entries = timeout(
        Duration::from_secs(2),
        x.hub.broadcast_offer(SessionDescription::offer("x-offer")),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].from_id, y.id);
}

#[tokio::test]
async fn test_answer_addressed_elsewhere_is_dropped() {
    let hub = SignalingHub::new(hub_config());

    let x = TestPeer::join_ready(&hub, OfferBehavior::Hang).await;
    let y = TestPeer::join_ready(&hub, OfferBehavior::Answer("y-answer".into())).await;
    let _v = TestPeer::join_ready(
        &hub,
        OfferBehavior::AnswerTo("v-answer".into(), y.id.clone()),
    )
    .await;

    let entries = x
        .hub
        .broadcast_offer(SessionDescription::offer("x-offer"))
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].description.sdp, "y-answer");
}

#[tokio::test]
async fn test_self_only_routing_drops_candidates_for_others() {
    let hub = SignalingHub::new(hub_config());
    assert_eq!(hub.config().candidate_routing, CandidateRouting::SelfOnly);

    let mut x = TestPeer::join_ready(&hub, OfferBehavior::Hang).await;
    let mut y = TestPeer::join_ready(&hub, OfferBehavior::Hang).await;

    x.hub
        .send_candidate_to(IceCandidate::new("to-y"), y.id.clone())
        .unwrap();
    x.hub
        .send_candidate_to(IceCandidate::new("to-self"), x.id.clone())
        .unwrap();

    let echoed = timeout(Duration::from_secs(1), x.candidates.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed.candidate.candidate, "to-self");
    assert_eq!(echoed.to_id, x.id);

    // Notifications from one peer are handled in order, so "to-y" was
    // already dropped by the time "to-self" came back
    assert!(y.candidates.try_recv().is_err());
}

#[tokio::test]
async fn test_registered_routing_delivers_to_target() {
    let hub = SignalingHub::new(hub_config().with_candidate_routing(CandidateRouting::Registered));

    let x = TestPeer::join_ready(&hub, OfferBehavior::Hang).await;
    let mut y = TestPeer::join_ready(&hub, OfferBehavior::Hang).await;

    x.hub
        .send_candidate_to(IceCandidate::new("to-y"), y.id.clone())
        .unwrap();

    let delivered = timeout(Duration::from_secs(1), y.candidates.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.candidate.candidate, "to-y");
    assert_eq!(delivered.to_id, y.id);
}

#[tokio::test]
async fn test_unknown_method_is_rejected() {
    let hub = SignalingHub::new(hub_config());
    let x = TestPeer::join(&hub, OfferBehavior::Hang).await;

    let err = x
        .hub
        .channel()
        .call("launchRockets", serde_json::Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Remote { code, .. } if code == error_codes::METHOD_NOT_FOUND));

    // Any well-formed envelope counts as the first message
    assert_eq!(hub.peer_state(&x.id).await, Some(PeerState::Ready));
}
