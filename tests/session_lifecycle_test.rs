//! Session lifecycle integration tests
//!
//! This module drives the orchestrator through complete sessions including:
//! - Offer handling and answer emission
//! - Promotion to connected on transport connectivity
//! - Supersession by a newer offer with strict close-before-create ordering
//! - Fatal transport failures and teardown idempotence
//! - Telemetry emission before resource release
//! - Relay loss, peer disconnects, degraded capture, and cleanup

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rovercam::capture::SyntheticProvider;
use rovercam::config::AgentConfig;
use rovercam::session::{SessionOrchestrator, SessionPhase};
use rovercam::signaling::SignalMessage;
use rovercam::testing::{MockTransportEngine, RecordingSignals, ScriptedProvider};
use rovercam::transport::{SessionDescription, TransportState};

const OFFER_SDP: &str =
    "v=0\r\no=- 46117 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";

fn harness() -> (
    SessionOrchestrator,
    Arc<MockTransportEngine>,
    Arc<RecordingSignals>,
) {
    let engine = MockTransportEngine::new();
    let signals = Arc::new(RecordingSignals::new());
    let orchestrator = SessionOrchestrator::new(
        engine.clone(),
        Arc::new(SyntheticProvider::new()),
        signals.clone(),
        &AgentConfig::default(),
    );
    (orchestrator, engine, signals)
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn wait_for_phase(orchestrator: &SessionOrchestrator, want: SessionPhase) {
    for _ in 0..400 {
        if orchestrator.phase().await == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for phase {}", want);
}

async fn wait_for_answers(signals: &RecordingSignals, count: usize) {
    wait_until("answer emission", || signals.answers().len() >= count).await;
}

fn index_of(ops: &[String], op: &str) -> usize {
    ops.iter()
        .position(|o| o == op)
        .unwrap_or_else(|| panic!("op {} not recorded in {:?}", op, ops))
}

#[tokio::test]
async fn test_offer_is_answered_for_the_viewer() {
    let (orchestrator, engine, signals) = harness();

    orchestrator
        .on_offer(SessionDescription::offer(OFFER_SDP), "viewer-1")
        .await;
    wait_for_answers(&signals, 1).await;

    let answers = signals.answers();
    assert_eq!(answers[0].0, "viewer-1");
    assert!(answers[0].1.starts_with("v=0"), "answer should carry SDP");

    // The readiness re-arm follows the emitted answer
    wait_until("readiness re-arm", || {
        signals
            .sent()
            .iter()
            .any(|m| matches!(m, SignalMessage::RobotReadyForOffers))
    })
    .await;
    let sent = signals.sent();
    let answer_at = sent
        .iter()
        .position(|m| matches!(m, SignalMessage::Answer { .. }))
        .unwrap();
    let rearm_at = sent
        .iter()
        .position(|m| matches!(m, SignalMessage::RobotReadyForOffers))
        .unwrap();
    assert!(answer_at < rearm_at, "re-arm must come after the answer");

    let handle = engine.handle(0).expect("one handle created");
    assert!(handle.has_handler(), "events must be subscribed");
    assert_eq!(handle.remote_description().unwrap().sdp, OFFER_SDP);
    assert!(handle.local_description().is_some());

    // Answer emitted but transport not connected yet
    assert_eq!(orchestrator.phase().await, SessionPhase::Negotiating);
    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.viewer_id.as_deref(), Some("viewer-1"));
    assert!(!snapshot.degraded);
    assert!(snapshot.track.expect("track created").attached);
}

#[tokio::test]
async fn test_transport_connectivity_promotes_the_session() {
    let (orchestrator, engine, signals) = harness();
    let mut events = orchestrator.subscribe_state_events();

    orchestrator
        .on_offer(SessionDescription::offer(OFFER_SDP), "viewer-1")
        .await;
    wait_for_answers(&signals, 1).await;

    engine.handle(0).unwrap().emit_state(TransportState::Connected);
    wait_for_phase(&orchestrator, SessionPhase::Connected).await;

    let mut phases = Vec::new();
    while let Ok(event) = events.try_recv() {
        phases.push(event.phase);
    }
    assert_eq!(
        phases,
        vec![SessionPhase::Negotiating, SessionPhase::Connected]
    );
}

#[tokio::test]
async fn test_new_offer_supersedes_the_active_session() {
    let (orchestrator, engine, signals) = harness();
    let mut events = orchestrator.subscribe_state_events();

    orchestrator
        .on_offer(SessionDescription::offer(OFFER_SDP), "viewer-1")
        .await;
    wait_for_answers(&signals, 1).await;

    orchestrator
        .on_offer(SessionDescription::offer(OFFER_SDP), "viewer-2")
        .await;
    wait_for_answers(&signals, 2).await;

    // Old transport fully closed before the new one exists
    let ops = engine.ops();
    assert!(
        index_of(&ops, "h0.close") < index_of(&ops, "create_handle#1"),
        "old handle must close before the successor is created: {:?}",
        ops
    );
    assert!(engine.handle(0).unwrap().is_closed());
    assert!(!engine.handle(1).unwrap().is_closed());

    assert_eq!(signals.answers()[1].0, "viewer-2");
    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.viewer_id.as_deref(), Some("viewer-2"));
    assert_eq!(snapshot.phase, SessionPhase::Negotiating);

    let mut closings = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.phase == SessionPhase::Closing {
            closings.push(event.reason.unwrap_or_default());
        }
    }
    assert_eq!(closings, vec!["superseded by new offer".to_string()]);
}

#[tokio::test]
async fn test_transport_failure_tears_down_exactly_once() {
    let (orchestrator, engine, signals) = harness();
    let mut events = orchestrator.subscribe_state_events();

    orchestrator
        .on_offer(SessionDescription::offer(OFFER_SDP), "viewer-1")
        .await;
    wait_for_answers(&signals, 1).await;
    let handle = engine.handle(0).unwrap();
    handle.emit_state(TransportState::Connected);
    wait_for_phase(&orchestrator, SessionPhase::Connected).await;

    // Both notes are queued before the first teardown runs; the second
    // must be recognized as stale and ignored.
    handle.emit_state(TransportState::Failed);
    handle.emit_state(TransportState::Failed);

    wait_until("handle close", || handle.is_closed()).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let ops = engine.ops();
    assert_eq!(ops.iter().filter(|o| *o == "h0.close").count(), 1);
    assert_eq!(orchestrator.phase().await, SessionPhase::Idle);
    assert!(orchestrator.snapshot().await.session_id.is_none());

    let mut failed = 0;
    let mut closing = 0;
    while let Ok(event) = events.try_recv() {
        match event.phase {
            SessionPhase::Failed => {
                failed += 1;
                let reason = event.reason.unwrap();
                assert!(reason.contains("transport entered failed state"), "{}", reason);
            }
            SessionPhase::Closing => closing += 1,
            _ => {}
        }
    }
    assert_eq!((failed, closing), (1, 1));
}

#[tokio::test]
async fn test_failure_telemetry_precedes_resource_release() {
    let (orchestrator, engine, signals) = harness();

    orchestrator
        .on_offer(SessionDescription::offer(OFFER_SDP), "viewer-1")
        .await;
    wait_for_answers(&signals, 1).await;

    // Drain the event stream at the instant the handle closes: the fatal
    // phases must already be on the wire, the terminal Idle must not.
    let events = Arc::new(Mutex::new(orchestrator.subscribe_state_events()));
    let seen_at_close: Arc<Mutex<Vec<SessionPhase>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let events = events.clone();
        let seen = seen_at_close.clone();
        engine.on_close(move |_id| {
            let mut events = events.lock().unwrap();
            while let Ok(event) = events.try_recv() {
                seen.lock().unwrap().push(event.phase);
            }
        });
    }

    let handle = engine.handle(0).unwrap();
    handle.emit_state(TransportState::Failed);
    wait_until("handle close", || handle.is_closed()).await;

    let seen = seen_at_close.lock().unwrap().clone();
    assert!(seen.contains(&SessionPhase::Failed), "saw {:?}", seen);
    assert!(seen.contains(&SessionPhase::Closing), "saw {:?}", seen);
    assert!(!seen.contains(&SessionPhase::Idle), "saw {:?}", seen);
}

#[tokio::test]
async fn test_handle_creation_failure_fails_the_session() {
    let (orchestrator, engine, signals) = harness();
    let mut events = orchestrator.subscribe_state_events();
    engine.fail_op("create_handle");

    orchestrator
        .on_offer(SessionDescription::offer(OFFER_SDP), "viewer-1")
        .await;

    let mut reason = None;
    wait_until("failure event", || {
        while let Ok(event) = events.try_recv() {
            if event.phase == SessionPhase::Failed {
                reason = event.reason.clone();
                return true;
            }
        }
        false
    })
    .await;

    assert!(reason.unwrap().contains("transport handle creation failed"));
    assert_eq!(orchestrator.phase().await, SessionPhase::Idle);
    assert!(engine.handles().is_empty());
    assert!(signals.answers().is_empty());
}

#[tokio::test]
async fn test_answer_send_failure_fails_the_session() {
    let (orchestrator, engine, signals) = harness();
    let mut events = orchestrator.subscribe_state_events();
    signals.fail_sends(true);

    orchestrator
        .on_offer(SessionDescription::offer(OFFER_SDP), "viewer-1")
        .await;

    let mut reason = None;
    wait_until("failure event", || {
        while let Ok(event) = events.try_recv() {
            if event.phase == SessionPhase::Failed {
                reason = event.reason.clone();
                return true;
            }
        }
        false
    })
    .await;

    assert!(reason.unwrap().contains("answer emission failed"));
    wait_for_phase(&orchestrator, SessionPhase::Idle).await;
    assert!(engine.handle(0).unwrap().is_closed());
    assert!(signals.answers().is_empty());
}

#[tokio::test]
async fn test_relay_loss_fails_the_active_session() {
    let (orchestrator, engine, signals) = harness();
    let mut events = orchestrator.subscribe_state_events();

    orchestrator
        .on_offer(SessionDescription::offer(OFFER_SDP), "viewer-1")
        .await;
    wait_for_answers(&signals, 1).await;
    let handle = engine.handle(0).unwrap();
    handle.emit_state(TransportState::Connected);
    wait_for_phase(&orchestrator, SessionPhase::Connected).await;

    orchestrator.on_relay_disconnected().await;

    assert!(handle.is_closed());
    assert_eq!(orchestrator.phase().await, SessionPhase::Idle);

    let mut failure_reason = None;
    while let Ok(event) = events.try_recv() {
        if event.phase == SessionPhase::Failed {
            failure_reason = event.reason;
        }
    }
    assert!(failure_reason
        .expect("failure event emitted")
        .contains("signaling relay disconnected"));
}

#[tokio::test]
async fn test_relay_loss_clears_early_candidates() {
    let (orchestrator, _engine, _signals) = harness();

    orchestrator
        .on_candidate(
            rovercam::transport::IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host"),
            Some("viewer-1"),
        )
        .await;
    assert_eq!(orchestrator.snapshot().await.queued_candidates, 1);

    orchestrator.on_relay_disconnected().await;
    assert_eq!(orchestrator.snapshot().await.queued_candidates, 0);
    assert_eq!(orchestrator.phase().await, SessionPhase::Idle);
}

#[tokio::test]
async fn test_full_cleanup_is_idempotent() {
    let (orchestrator, engine, signals) = harness();

    orchestrator
        .on_offer(SessionDescription::offer(OFFER_SDP), "viewer-1")
        .await;
    wait_for_answers(&signals, 1).await;

    orchestrator.cleanup(true).await;
    assert_eq!(orchestrator.phase().await, SessionPhase::Idle);
    assert!(engine.handle(0).unwrap().is_closed());
    assert!(orchestrator.snapshot().await.session_id.is_none());

    orchestrator.cleanup(true).await;
    let ops = engine.ops();
    assert_eq!(ops.iter().filter(|o| *o == "h0.close").count(), 1);
}

#[tokio::test]
async fn test_partial_cleanup_keeps_session_and_transport() {
    let (orchestrator, engine, signals) = harness();

    orchestrator
        .on_offer(SessionDescription::offer(OFFER_SDP), "viewer-1")
        .await;
    wait_for_answers(&signals, 1).await;
    assert!(orchestrator.snapshot().await.track.is_some());

    orchestrator.cleanup(false).await;

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.phase, SessionPhase::Negotiating);
    assert_eq!(snapshot.viewer_id.as_deref(), Some("viewer-1"));
    assert!(snapshot.track.is_none(), "track must be released");
    assert!(!engine.handle(0).unwrap().is_closed());
}

#[tokio::test]
async fn test_capture_unavailable_degrades_but_still_answers() {
    let engine = MockTransportEngine::new();
    let signals = Arc::new(RecordingSignals::new());
    let provider = Arc::new(ScriptedProvider::new());
    provider.set_unavailable(true);
    let orchestrator = SessionOrchestrator::new(
        engine.clone(),
        provider.clone(),
        signals.clone(),
        &AgentConfig::default(),
    );

    orchestrator
        .on_offer(SessionDescription::offer(OFFER_SDP), "viewer-1")
        .await;
    wait_for_answers(&signals, 1).await;

    let snapshot = orchestrator.snapshot().await;
    assert!(snapshot.degraded, "capture loss must degrade, not fail");
    assert!(snapshot.track.is_none());
    assert_eq!(provider.open_count(), 0);

    // Session still reaches connected without video
    engine.handle(0).unwrap().emit_state(TransportState::Connected);
    wait_for_phase(&orchestrator, SessionPhase::Connected).await;
}

#[tokio::test]
async fn test_peer_disconnect_closes_only_the_matching_session() {
    let (orchestrator, engine, signals) = harness();
    let mut events = orchestrator.subscribe_state_events();

    orchestrator
        .on_offer(SessionDescription::offer(OFFER_SDP), "viewer-1")
        .await;
    wait_for_answers(&signals, 1).await;

    orchestrator.on_peer_disconnected("viewer-9").await;
    assert_eq!(orchestrator.phase().await, SessionPhase::Negotiating);
    assert!(!engine.handle(0).unwrap().is_closed());

    orchestrator.on_peer_disconnected("viewer-1").await;
    assert_eq!(orchestrator.phase().await, SessionPhase::Idle);
    assert!(engine.handle(0).unwrap().is_closed());

    let mut closing_reason = None;
    while let Ok(event) = events.try_recv() {
        if event.phase == SessionPhase::Closing {
            closing_reason = event.reason;
        }
    }
    assert_eq!(closing_reason.as_deref(), Some("viewer disconnected"));
}
