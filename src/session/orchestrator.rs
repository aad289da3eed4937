//! Session orchestration
//!
//! [`SessionOrchestrator`] owns the at-most-one-active-session invariant.
//! Every session-mutating operation (offer, candidate, command, transport
//! event, cleanup) serializes on one async lock around the session slot, so
//! invariants spanning session, transport handle and track always move
//! together. Frame production never touches that lock.
//!
//! Negotiation runs as a spawned task that re-acquires the lock for each
//! side-effecting step and verifies the session it was started for is still
//! the current one, aborting quietly when a newer offer or a disconnect has
//! superseded it. The transport handle is created under the same lock that
//! tears the previous one down, so two live transports can never coexist.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::candidates::CandidateRelay;
use crate::capture::{FrameSourceProvider, SourceConfig};
use crate::commands::{self, SessionCommand};
use crate::config::AgentConfig;
use crate::errors::AgentError;
use crate::session::connection::{ConnectionStateMachine, TransportReaction};
use crate::session::state::{PeerSession, SessionPhase, StateEvent};
use crate::signaling::{SignalMessage, SignalSender};
use crate::track::{TrackController, TrackStatus};
use crate::transport::{
    CommandSink, IceCandidate, SessionDescription, TransportConfig, TransportEngine,
    TransportEvent, TransportHandle, TransportState,
};

/// Candidates held while no session exists; oldest dropped past this.
const MAX_EARLY_CANDIDATES: usize = 64;

const STATE_EVENT_CAPACITY: usize = 64;

/// Point-in-time view of the orchestrator for telemetry and tests
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub session_id: Option<Uuid>,
    pub viewer_id: Option<String>,
    pub degraded: bool,
    pub queued_candidates: usize,
    pub track: Option<TrackStatus>,
}

/// Transport event routed through the pump, stamped with the session it
/// belongs to so stale handles cannot touch a successor session.
struct TransportNote {
    session_id: Uuid,
    event: TransportEvent,
}

struct ActiveSession {
    session: PeerSession,
    /// Adopted by the negotiation task once the engine hands it out
    handle: Option<Arc<dyn TransportHandle>>,
    relay: CandidateRelay,
    track: Option<TrackController>,
    degraded: bool,
}

struct SessionSlot {
    machine: ConnectionStateMachine,
    active: Option<ActiveSession>,
    /// Candidates received before any session existed, with their origin
    early: Vec<(Option<String>, IceCandidate)>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            machine: ConnectionStateMachine::new(),
            active: None,
            early: Vec::new(),
        }
    }

    fn matches(&self, session_id: Uuid) -> bool {
        self.active
            .as_ref()
            .map(|a| a.session.id == session_id)
            .unwrap_or(false)
    }
}

struct OrchestratorInner {
    engine: Arc<dyn TransportEngine>,
    provider: Arc<dyn FrameSourceProvider>,
    signals: Arc<dyn SignalSender>,
    transport_config: TransportConfig,
    source_config: SourceConfig,
    slot: Mutex<SessionSlot>,
    events: broadcast::Sender<StateEvent>,
    notes_tx: mpsc::UnboundedSender<TransportNote>,
    pump: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Cheaply cloneable front for one robot agent's session state.
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl SessionOrchestrator {
    /// Build the orchestrator and start its transport event pump.
    ///
    /// Must be called on a tokio runtime.
    pub fn new(
        engine: Arc<dyn TransportEngine>,
        provider: Arc<dyn FrameSourceProvider>,
        signals: Arc<dyn SignalSender>,
        config: &AgentConfig,
    ) -> Self {
        let (notes_tx, notes_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(STATE_EVENT_CAPACITY);
        let inner = Arc::new(OrchestratorInner {
            engine,
            provider,
            signals,
            transport_config: TransportConfig::from(&config.transport),
            source_config: SourceConfig::from(&config.video),
            slot: Mutex::new(SessionSlot::new()),
            events,
            notes_tx,
            pump: std::sync::Mutex::new(None),
        });
        let pump = tokio::spawn(event_pump(Arc::downgrade(&inner), notes_rx));
        *inner.pump.lock().expect("lock poisoned") = Some(pump);
        Self { inner }
    }

    /// Viewer offer from the relay. Supersedes any active session: the old
    /// transport handle is fully closed before the new session is stored,
    /// then negotiation proceeds in the background.
    pub async fn on_offer(&self, description: SessionDescription, from_viewer: &str) {
        let Some(session_id) = self.inner.begin_session(from_viewer).await else {
            return;
        };
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.negotiate(session_id, description).await;
        });
    }

    /// Remote candidate from the relay, with the viewer it came from when
    /// the relay provided one.
    pub async fn on_candidate(&self, candidate: IceCandidate, from: Option<&str>) {
        self.inner.on_candidate(candidate, from).await;
    }

    /// Relay says this viewer went away; close its session cleanly.
    pub async fn on_peer_disconnected(&self, viewer_id: &str) {
        self.inner.on_peer_disconnected(viewer_id).await;
    }

    /// Signaling bus lost. No further negotiation or command traffic can
    /// reach the session, so it is failed and fully torn down.
    pub async fn on_relay_disconnected(&self) {
        self.inner.on_relay_disconnected().await;
    }

    /// In-session command against the current session. Commands outside
    /// `Connected` are acknowledged with a rejection, never dropped.
    pub async fn handle_command(&self, payload: &str, reply: Arc<dyn CommandSink>) {
        let current = {
            let slot = self.inner.slot.lock().await;
            slot.active.as_ref().map(|a| a.session.id)
        };
        match current {
            Some(session_id) => {
                self.inner
                    .handle_command_for(session_id, payload, reply)
                    .await
            }
            None => {
                log::warn!("Command '{}' with no session rejected", payload);
                OrchestratorInner::ack(&reply, &commands::rejection_ack(payload));
            }
        }
    }

    /// Release session resources. Always releases the track and clears
    /// queued candidates; with `full` the transport handle is closed and
    /// the session discarded too. Idempotent in both forms.
    pub async fn cleanup(&self, full: bool) {
        let mut slot = self.inner.slot.lock().await;
        if full {
            self.inner
                .teardown_locked(&mut slot, "cleanup requested")
                .await;
        } else {
            self.inner.release_media_locked(&mut slot).await;
        }
    }

    pub fn subscribe_state_events(&self) -> broadcast::Receiver<StateEvent> {
        self.inner.events.subscribe()
    }

    pub async fn phase(&self) -> SessionPhase {
        self.inner.slot.lock().await.machine.phase()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let slot = self.inner.slot.lock().await;
        let mut snapshot = SessionSnapshot {
            phase: slot.machine.phase(),
            session_id: None,
            viewer_id: None,
            degraded: false,
            queued_candidates: slot.early.len(),
            track: None,
        };
        if let Some(active) = slot.active.as_ref() {
            snapshot.session_id = Some(active.session.id);
            snapshot.viewer_id = Some(active.session.viewer_id.clone());
            snapshot.degraded = active.degraded;
            snapshot.queued_candidates = active.relay.queued();
            if let Some(track) = active.track.as_ref() {
                snapshot.track = Some(track.status().await);
            }
        }
        snapshot
    }
}

async fn event_pump(
    inner: std::sync::Weak<OrchestratorInner>,
    mut notes: mpsc::UnboundedReceiver<TransportNote>,
) {
    while let Some(note) = notes.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        inner.dispatch_note(note).await;
    }
}

impl OrchestratorInner {
    /// Tear down any current session and install a fresh one in
    /// `Negotiating`. Returns the new session's id.
    async fn begin_session(&self, from_viewer: &str) -> Option<Uuid> {
        let mut slot = self.slot.lock().await;
        if slot.active.is_some() {
            log::info!("Offer from {} supersedes the active session", from_viewer);
            self.teardown_locked(&mut slot, "superseded by new offer")
                .await;
        }
        if let Err(e) = slot.machine.transition(SessionPhase::Negotiating) {
            log::error!("{}", e);
            return None;
        }

        let session = PeerSession::new(from_viewer);
        let session_id = session.id;
        log::info!(
            "Session {} negotiating with viewer {}",
            session_id,
            from_viewer
        );

        let mut relay = CandidateRelay::new();
        let early = std::mem::take(&mut slot.early);
        let (matching, foreign): (Vec<_>, Vec<_>) = early
            .into_iter()
            .partition(|(from, _)| from.as_deref().map_or(true, |v| v == from_viewer));
        if !foreign.is_empty() {
            log::debug!(
                "Discarding {} early candidates from other viewers",
                foreign.len()
            );
        }
        relay.preload(matching.into_iter().map(|(_, candidate)| candidate));

        let active = ActiveSession {
            session,
            handle: None,
            relay,
            track: None,
            degraded: false,
        };
        self.emit(&active, SessionPhase::Negotiating, None);
        slot.active = Some(active);
        Some(session_id)
    }

    /// Drive one session from offer to emitted answer. Re-locks and checks
    /// session identity before every side-effecting step; a superseded
    /// negotiation stops without touching the successor session.
    async fn negotiate(&self, session_id: Uuid, offer: SessionDescription) {
        // Transport handle, created under the slot lock so it can never
        // coexist with a predecessor that teardown is still closing.
        {
            let mut slot = self.slot.lock().await;
            if !slot.matches(session_id) {
                log::debug!("Negotiation {} superseded before handle creation", session_id);
                return;
            }
            match self.engine.create_handle(&self.transport_config).await {
                Ok(handle) => {
                    let tx = self.notes_tx.clone();
                    handle.set_event_handler(Arc::new(move |event| {
                        let _ = tx.send(TransportNote { session_id, event });
                    }));
                    if let Some(active) = slot.active.as_mut() {
                        active.handle = Some(handle);
                    }
                }
                Err(e) => {
                    self.fail_session_locked(
                        &mut slot,
                        format!("transport handle creation failed: {}", e),
                    )
                    .await;
                    return;
                }
            }
        }

        // Media track. Capture trouble degrades the session, never aborts it.
        {
            let mut slot = self.slot.lock().await;
            if !slot.matches(session_id) {
                log::debug!("Negotiation {} superseded before track attach", session_id);
                return;
            }
            let handle = slot.active.as_ref().and_then(|a| a.handle.clone());
            let Some(handle) = handle else { return };
            match TrackController::create(self.provider.as_ref(), &self.source_config) {
                Ok(track) => match track.attach_to(&handle).await {
                    Ok(()) => {
                        if let Some(active) = slot.active.as_mut() {
                            active.track = Some(track);
                        }
                    }
                    Err(e) => {
                        log::warn!("Track attach failed, session continues without video: {}", e);
                        track.release().await;
                        if let Some(active) = slot.active.as_mut() {
                            active.degraded = true;
                        }
                    }
                },
                Err(e) => {
                    log::warn!("Capture unavailable, session continues without video: {}", e);
                    if let Some(active) = slot.active.as_mut() {
                        active.degraded = true;
                    }
                }
            }
        }

        // Remote description, then the candidate backlog in receipt order.
        {
            let mut slot = self.slot.lock().await;
            if !slot.matches(session_id) {
                log::debug!(
                    "Negotiation {} superseded before remote description",
                    session_id
                );
                return;
            }
            let handle = slot.active.as_ref().and_then(|a| a.handle.clone());
            let Some(handle) = handle else { return };
            if let Err(e) = handle.set_remote_description(offer).await {
                self.fail_session_locked(&mut slot, format!("remote description rejected: {}", e))
                    .await;
                return;
            }
            let flushed = match slot.active.as_mut() {
                Some(active) => active.relay.flush(&handle).await,
                None => return,
            };
            if let Err(e) = flushed {
                self.fail_session_locked(
                    &mut slot,
                    format!("candidate application failed: {}", e),
                )
                .await;
                return;
            }
        }

        // Answer exchange. Failure anywhere here fails the whole session;
        // a half-negotiated transport is never kept.
        {
            let mut slot = self.slot.lock().await;
            if !slot.matches(session_id) {
                log::debug!("Negotiation {} superseded before answer", session_id);
                return;
            }
            let pair = slot
                .active
                .as_ref()
                .and_then(|a| a.handle.clone().map(|h| (h, a.session.viewer_id.clone())));
            let Some((handle, viewer_id)) = pair else { return };

            let answer = match handle.create_answer().await {
                Ok(answer) => answer,
                Err(e) => {
                    self.fail_session_locked(&mut slot, format!("answer creation failed: {}", e))
                        .await;
                    return;
                }
            };
            if let Err(e) = handle.set_local_description(answer.clone()).await {
                self.fail_session_locked(&mut slot, format!("local description rejected: {}", e))
                    .await;
                return;
            }
            if let Err(e) = self
                .signals
                .send(SignalMessage::answer(answer, viewer_id))
                .await
            {
                self.fail_session_locked(&mut slot, format!("answer emission failed: {}", e))
                    .await;
                return;
            }
            log::info!(
                "Session {} answer emitted, awaiting transport connectivity",
                session_id
            );
            // Answer is out; the relay may route the next queued offer.
            if let Err(e) = self.signals.send(SignalMessage::RobotReadyForOffers).await {
                log::warn!("Readiness re-arm not delivered: {}", e);
            }
        }
    }

    async fn on_candidate(&self, candidate: IceCandidate, from: Option<&str>) {
        let mut slot = self.slot.lock().await;
        let mut fatal: Option<String> = None;
        match slot.active.as_mut() {
            None => {
                if slot.early.len() >= MAX_EARLY_CANDIDATES {
                    slot.early.remove(0);
                    log::warn!("Early candidate queue full, dropping the oldest");
                }
                slot.early.push((from.map(str::to_string), candidate));
                log::debug!("Candidate held, no session yet ({} early)", slot.early.len());
            }
            Some(active) => {
                if let Some(from) = from {
                    if from != active.session.viewer_id {
                        log::debug!(
                            "Ignoring candidate from {} during session with {}",
                            from,
                            active.session.viewer_id
                        );
                        return;
                    }
                }
                match active.handle.clone() {
                    None => active.relay.preload([candidate]),
                    Some(handle) => {
                        if let Err(e) = active.relay.accept(&handle, candidate).await {
                            fatal = Some(format!("candidate application failed: {}", e));
                        }
                    }
                }
            }
        }
        if let Some(reason) = fatal {
            self.fail_session_locked(&mut slot, reason).await;
        }
    }

    async fn on_peer_disconnected(&self, viewer_id: &str) {
        let mut slot = self.slot.lock().await;
        match slot.active.as_ref() {
            Some(active) if active.session.viewer_id == viewer_id => {
                log::info!("Viewer {} disconnected", viewer_id);
                self.teardown_locked(&mut slot, "viewer disconnected").await;
            }
            Some(_) => log::debug!("Disconnect notice for non-session viewer {}", viewer_id),
            None => log::debug!("Disconnect notice for {} with no session", viewer_id),
        }
        slot.early
            .retain(|(from, _)| from.as_deref() != Some(viewer_id));
    }

    async fn on_relay_disconnected(&self) {
        let mut slot = self.slot.lock().await;
        slot.early.clear();
        if slot.active.is_some() {
            let err = AgentError::RelayDisconnected("signaling bus lost".to_string());
            self.fail_session_locked(&mut slot, err.to_string()).await;
        }
    }

    async fn dispatch_note(&self, note: TransportNote) {
        match note.event {
            TransportEvent::ConnectionState(state) => {
                self.on_transport_state(note.session_id, state).await;
            }
            TransportEvent::IceCandidate(candidate) => {
                let viewer = {
                    let slot = self.slot.lock().await;
                    if !slot.matches(note.session_id) {
                        log::debug!("Dropping local candidate from a stale session");
                        return;
                    }
                    slot.active
                        .as_ref()
                        .map(|a| a.session.viewer_id.clone())
                };
                if let Some(viewer) = viewer {
                    let message = SignalMessage::candidate_to(viewer, candidate);
                    if let Err(e) = self.signals.send(message).await {
                        log::warn!("Local candidate emission failed: {}", e);
                    }
                }
            }
            TransportEvent::Command { payload, reply } => {
                self.handle_command_for(note.session_id, &payload, reply)
                    .await;
            }
        }
    }

    async fn on_transport_state(&self, session_id: Uuid, state: TransportState) {
        let mut slot = self.slot.lock().await;
        if !slot.matches(session_id) {
            log::debug!("Ignoring transport state {} for a stale session", state);
            return;
        }
        match slot.machine.classify(state) {
            TransportReaction::Established => {
                if slot.machine.phase() == SessionPhase::Negotiating {
                    if let Err(e) = slot.machine.transition(SessionPhase::Connected) {
                        log::error!("{}", e);
                        return;
                    }
                    if let Some(active) = slot.active.as_ref() {
                        log::info!(
                            "Session {} connected to viewer {}",
                            active.session.id,
                            active.session.viewer_id
                        );
                        self.emit(active, SessionPhase::Connected, None);
                    }
                }
            }
            TransportReaction::Fatal(reason) => {
                let err = AgentError::TransportFailed(reason);
                self.fail_session_locked(&mut slot, err.to_string()).await;
            }
            TransportReaction::Transient => {
                log::warn!("Transport reports {}, waiting for recovery", state);
            }
            TransportReaction::Ignored => {
                log::debug!(
                    "Transport state {} ignored in phase {}",
                    state,
                    slot.machine.phase()
                );
            }
        }
    }

    async fn handle_command_for(
        &self,
        session_id: Uuid,
        payload: &str,
        reply: Arc<dyn CommandSink>,
    ) {
        let mut slot = self.slot.lock().await;
        if !slot.matches(session_id) {
            log::warn!("Command '{}' for a stale session rejected", payload);
            Self::ack(&reply, &commands::rejection_ack(payload));
            return;
        }
        let phase = slot.machine.phase();
        let command = SessionCommand::parse(payload);
        if !phase.accepts_commands() {
            let err = AgentError::InvalidCommand {
                command: command.name().to_string(),
                phase: phase.to_string(),
            };
            log::warn!("{}", err);
            Self::ack(&reply, &commands::rejection_ack(payload));
            return;
        }
        match command {
            SessionCommand::StartVideo => self.start_video_locked(&mut slot, &reply).await,
            SessionCommand::StopVideo => self.stop_video_locked(&mut slot, &reply).await,
            SessionCommand::Passthrough(_) => {
                log::debug!("Echoing channel payload '{}'", payload);
                Self::ack(&reply, &command.success_ack());
            }
        }
    }

    async fn start_video_locked(&self, slot: &mut SessionSlot, reply: &Arc<dyn CommandSink>) {
        let Some(active) = slot.active.as_mut() else { return };
        if let Some(track) = active.track.as_ref() {
            track.enable();
            Self::ack(reply, commands::VIDEO_STARTED_ACK);
            return;
        }
        let Some(handle) = active.handle.clone() else {
            Self::ack(reply, &commands::failure_ack("no transport for video"));
            return;
        };
        match TrackController::create(self.provider.as_ref(), &self.source_config) {
            Ok(track) => match track.attach_to(&handle).await {
                Ok(()) => {
                    log::info!("Video started on session {}", active.session.id);
                    active.track = Some(track);
                    active.degraded = false;
                    Self::ack(reply, commands::VIDEO_STARTED_ACK);
                }
                Err(e) => {
                    log::warn!("Video start attach failed: {}", e);
                    track.release().await;
                    active.degraded = true;
                    Self::ack(reply, &commands::failure_ack(&e.to_string()));
                }
            },
            Err(e) => {
                log::warn!("Video start capture failed: {}", e);
                active.degraded = true;
                Self::ack(reply, &commands::failure_ack(&e.to_string()));
            }
        }
    }

    async fn stop_video_locked(&self, slot: &mut SessionSlot, reply: &Arc<dyn CommandSink>) {
        let Some(active) = slot.active.as_mut() else { return };
        match active.track.take() {
            Some(track) => {
                track.release().await;
                log::info!("Video stopped on session {}", active.session.id);
            }
            None => log::debug!("Video stop with no track, acknowledging anyway"),
        }
        Self::ack(reply, commands::VIDEO_STOPPED_ACK);
    }

    fn ack(reply: &Arc<dyn CommandSink>, payload: &str) {
        if let Err(e) = reply.send(payload) {
            log::warn!("Ack '{}' failed: {}", payload, e);
        }
    }

    /// Fail the current session: emit the `Failed` event while resources
    /// are still held, then run full teardown.
    async fn fail_session_locked(&self, slot: &mut SessionSlot, reason: String) {
        if let Some(active) = slot.active.as_ref() {
            log::error!("Session {} failed: {}", active.session.id, reason);
            if slot.machine.phase().is_active() {
                if let Err(e) = slot.machine.transition(SessionPhase::Failed) {
                    log::error!("{}", e);
                }
            }
            if let Some(active) = slot.active.as_ref() {
                self.emit(active, SessionPhase::Failed, Some(reason.clone()));
            }
        }
        self.teardown_locked(slot, &reason).await;
    }

    /// Full teardown: discard the session, release the track, clear queued
    /// candidates, close the transport handle. No-op when nothing is active.
    async fn teardown_locked(&self, slot: &mut SessionSlot, reason: &str) {
        let Some(mut active) = slot.active.take() else { return };
        log::info!("Tearing down session {} ({})", active.session.id, reason);

        if let Err(e) = slot.machine.transition(SessionPhase::Closing) {
            log::error!("{}", e);
        }
        self.emit(&active, SessionPhase::Closing, Some(reason.to_string()));

        if let Some(track) = active.track.take() {
            track.release().await;
        }
        active.relay.clear();
        if let Some(handle) = active.handle.take() {
            handle.clear_event_handler();
            if let Err(e) = handle.close().await {
                log::warn!("Transport handle close failed: {}", e);
            }
        }

        if let Err(e) = slot.machine.transition(SessionPhase::Idle) {
            log::error!("{}", e);
        }
        self.emit(&active, SessionPhase::Idle, None);
    }

    /// Partial cleanup: release the track and clear queued candidates but
    /// keep the session and its transport handle.
    async fn release_media_locked(&self, slot: &mut SessionSlot) {
        if let Some(active) = slot.active.as_mut() {
            if let Some(track) = active.track.take() {
                track.release().await;
            }
            active.relay.clear();
        }
    }

    fn emit(&self, active: &ActiveSession, phase: SessionPhase, reason: Option<String>) {
        let event = StateEvent {
            session_id: active.session.id,
            viewer_id: active.session.viewer_id.clone(),
            phase,
            degraded: active.degraded,
            reason,
            at: Utc::now(),
        };
        let _ = self.events.send(event);
    }
}

impl Drop for OrchestratorInner {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().expect("lock poisoned").take() {
            pump.abort();
        }
        if let Ok(mut slot) = self.slot.try_lock() {
            if slot.active.take().is_some() {
                log::warn!("Orchestrator dropped with an active session");
            }
        }
    }
}
