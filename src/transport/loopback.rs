//! In-process transport engine
//!
//! Stands in for a real media stack in tests, demos and soak runs. It
//! answers negotiation locally, reports connectivity through the same event
//! path a real engine would use, validates candidates the way a real stack
//! rejects garbage, and exposes a command channel the caller drives.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::capture::{MediaFeed, VideoFrame};
use crate::errors::AgentError;

use super::{
    CommandSink, IceCandidate, MediaKind, SdpType, SessionDescription, TrackSender,
    TransportConfig, TransportEngine, TransportEvent, TransportEventHandler, TransportHandle,
    TransportState,
};

#[derive(Default)]
pub struct LoopbackEngine {
    handles: Mutex<Vec<Arc<LoopbackHandle>>>,
    counter: AtomicUsize,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handles(&self) -> Vec<Arc<LoopbackHandle>> {
        self.handles.lock().expect("lock poisoned").clone()
    }

    pub fn latest_handle(&self) -> Option<Arc<LoopbackHandle>> {
        self.handles.lock().expect("lock poisoned").last().cloned()
    }
}

#[async_trait]
impl TransportEngine for LoopbackEngine {
    async fn create_handle(
        &self,
        config: &TransportConfig,
    ) -> Result<Arc<dyn TransportHandle>, AgentError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(LoopbackHandle::new(
            format!("loopback-{}", index),
            config.command_channel_label.clone(),
        ));
        log::debug!("Loopback handle {} created", handle.id);
        self.handles.lock().expect("lock poisoned").push(handle.clone());
        Ok(handle)
    }
}

pub struct LoopbackHandle {
    id: String,
    channel: Arc<LoopbackChannel>,
    state: Mutex<TransportState>,
    handler: Mutex<Option<TransportEventHandler>>,
    remote: Mutex<Option<SessionDescription>>,
    local: Mutex<Option<SessionDescription>>,
    senders: Mutex<Vec<Arc<LoopbackSender>>>,
    applied: Mutex<Vec<IceCandidate>>,
    closed: AtomicBool,
}

impl LoopbackHandle {
    fn new(id: String, channel_label: String) -> Self {
        Self {
            id,
            channel: Arc::new(LoopbackChannel {
                label: channel_label,
                acks: Mutex::new(Vec::new()),
            }),
            state: Mutex::new(TransportState::New),
            handler: Mutex::new(None),
            remote: Mutex::new(None),
            local: Mutex::new(None),
            senders: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Deliver a viewer command over the in-session channel.
    pub fn push_command(&self, payload: &str) {
        let handler = self.handler.lock().expect("lock poisoned").clone();
        match handler {
            Some(handler) => handler(TransportEvent::Command {
                payload: payload.to_string(),
                reply: self.channel.clone(),
            }),
            None => log::debug!("Loopback command '{}' with no subscriber", payload),
        }
    }

    /// Acknowledgments the session layer sent back on the channel.
    pub fn channel_acks(&self) -> Vec<String> {
        self.channel.acks()
    }

    pub fn channel_label(&self) -> &str {
        &self.channel.label
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.applied.lock().expect("lock poisoned").clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Read one frame from each attached video sender, the way a pacing
    /// loop would.
    pub fn poll_video_frames(&self) -> Vec<VideoFrame> {
        let senders = self.senders.lock().expect("lock poisoned").clone();
        senders.iter().filter_map(|s| s.pull_frame()).collect()
    }

    fn set_state(&self, state: TransportState) {
        *self.state.lock().expect("lock poisoned") = state;
        self.invoke(TransportEvent::ConnectionState(state));
    }

    fn invoke(&self, event: TransportEvent) {
        let handler = self.handler.lock().expect("lock poisoned").clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    fn guard_open(&self, op: &str) -> Result<(), AgentError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AgentError::TransportFailed(format!(
                "{} on closed handle {}",
                op, self.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TransportHandle for LoopbackHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_event_handler(&self, handler: TransportEventHandler) {
        *self.handler.lock().expect("lock poisoned") = Some(handler);
    }

    fn clear_event_handler(&self) {
        *self.handler.lock().expect("lock poisoned") = None;
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), AgentError> {
        self.guard_open("set_remote_description")?;
        if desc.sdp_type != SdpType::Offer {
            return Err(AgentError::NegotiationFailed(format!(
                "expected an offer, got {}",
                desc.sdp_type
            )));
        }
        if !desc.sdp.starts_with("v=") {
            return Err(AgentError::NegotiationFailed(
                "remote description is not SDP".to_string(),
            ));
        }
        *self.remote.lock().expect("lock poisoned") = Some(desc);
        self.set_state(TransportState::Connecting);
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription, AgentError> {
        self.guard_open("create_answer")?;
        if self.remote.lock().expect("lock poisoned").is_none() {
            return Err(AgentError::NegotiationFailed(
                "create_answer before remote description".to_string(),
            ));
        }
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=- {} 0 IN IP4 127.0.0.1\r\ns=loopback\r\nt=0 0\r\n",
            self.id
        )))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), AgentError> {
        self.guard_open("set_local_description")?;
        if desc.sdp_type != SdpType::Answer {
            return Err(AgentError::NegotiationFailed(format!(
                "expected an answer, got {}",
                desc.sdp_type
            )));
        }
        *self.local.lock().expect("lock poisoned") = Some(desc);
        // Gathering happens here in a real stack; report one host candidate
        // and then connectivity.
        self.invoke(TransportEvent::IceCandidate(IceCandidate::new(format!(
            "candidate:1 1 udp 2122260223 127.0.0.1 51000 typ host generation 0 id {}",
            self.id
        ))));
        self.set_state(TransportState::Connected);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), AgentError> {
        self.guard_open("add_ice_candidate")?;
        if self.remote.lock().expect("lock poisoned").is_none() {
            return Err(AgentError::NegotiationFailed(
                "candidate before remote description".to_string(),
            ));
        }
        if !candidate.candidate.starts_with("candidate:") {
            return Err(AgentError::MalformedCandidate(format!(
                "unparseable candidate line: {:?}",
                candidate.candidate
            )));
        }
        self.applied.lock().expect("lock poisoned").push(candidate);
        Ok(())
    }

    async fn senders(&self) -> Vec<Arc<dyn TrackSender>> {
        self.senders
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|s| s.clone() as Arc<dyn TrackSender>)
            .collect()
    }

    async fn add_track(
        &self,
        feed: Arc<dyn MediaFeed>,
    ) -> Result<Arc<dyn TrackSender>, AgentError> {
        self.guard_open("add_track")?;
        let sender = Arc::new(LoopbackSender {
            kind: MediaKind::Video,
            feed: Mutex::new(Some(feed)),
        });
        self.senders.lock().expect("lock poisoned").push(sender.clone());
        Ok(sender)
    }

    async fn state(&self) -> TransportState {
        *self.state.lock().expect("lock poisoned")
    }

    async fn close(&self) -> Result<(), AgentError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.set_state(TransportState::Closed);
            log::debug!("Loopback handle {} closed", self.id);
        }
        Ok(())
    }
}

pub struct LoopbackSender {
    kind: MediaKind,
    feed: Mutex<Option<Arc<dyn MediaFeed>>>,
}

impl LoopbackSender {
    pub fn pull_frame(&self) -> Option<VideoFrame> {
        let feed = self.feed.lock().expect("lock poisoned").clone();
        feed.map(|f| f.produce_frame())
    }
}

#[async_trait]
impl TrackSender for LoopbackSender {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn has_feed(&self) -> bool {
        self.feed.lock().expect("lock poisoned").is_some()
    }

    async fn replace_feed(&self, feed: Option<Arc<dyn MediaFeed>>) -> Result<(), AgentError> {
        *self.feed.lock().expect("lock poisoned") = feed;
        Ok(())
    }
}

/// Persistent command channel for one loopback handle.
pub struct LoopbackChannel {
    label: String,
    acks: Mutex<Vec<String>>,
}

impl LoopbackChannel {
    pub fn acks(&self) -> Vec<String> {
        self.acks.lock().expect("lock poisoned").clone()
    }
}

impl CommandSink for LoopbackChannel {
    fn send(&self, payload: &str) -> Result<(), AgentError> {
        self.acks.lock().expect("lock poisoned").push(payload.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> (TransportEventHandler, Arc<Mutex<Vec<TransportEvent>>>) {
        let seen: Arc<Mutex<Vec<TransportEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: TransportEventHandler = Arc::new(move |event| {
            sink.lock().expect("lock poisoned").push(event);
        });
        (handler, seen)
    }

    async fn connected_handle() -> (Arc<LoopbackHandle>, Arc<Mutex<Vec<TransportEvent>>>) {
        let engine = LoopbackEngine::new();
        let config = TransportConfig {
            stun_servers: vec![],
            command_channel_label: "control".to_string(),
        };
        engine.create_handle(&config).await.unwrap();
        let handle = engine.latest_handle().unwrap();
        let (handler, seen) = collector();
        handle.set_event_handler(handler);

        handle
            .set_remote_description(SessionDescription::offer("v=0\r\no=viewer\r\n"))
            .await
            .unwrap();
        let answer = handle.create_answer().await.unwrap();
        handle.set_local_description(answer).await.unwrap();
        (handle, seen)
    }

    #[tokio::test]
    async fn test_negotiation_reaches_connected_and_gathers() {
        let (handle, seen) = connected_handle().await;
        assert_eq!(handle.state().await, TransportState::Connected);

        let events = seen.lock().expect("lock poisoned");
        let states: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                TransportEvent::ConnectionState(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(states, vec![TransportState::Connecting, TransportState::Connected]);
        assert!(events.iter().any(|e| matches!(e, TransportEvent::IceCandidate(_))));
    }

    #[tokio::test]
    async fn test_answer_requires_remote_description() {
        let engine = LoopbackEngine::new();
        let config = TransportConfig {
            stun_servers: vec![],
            command_channel_label: "control".to_string(),
        };
        engine.create_handle(&config).await.unwrap();
        let handle = engine.latest_handle().unwrap();
        assert!(matches!(
            handle.create_answer().await.unwrap_err(),
            AgentError::NegotiationFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_candidate_errors_are_classified() {
        let engine = LoopbackEngine::new();
        let config = TransportConfig {
            stun_servers: vec![],
            command_channel_label: "control".to_string(),
        };
        engine.create_handle(&config).await.unwrap();
        let handle = engine.latest_handle().unwrap();

        // No remote description yet: a transport-level refusal.
        let early = handle
            .add_ice_candidate(IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host"))
            .await
            .unwrap_err();
        assert!(matches!(early, AgentError::NegotiationFailed(_)));

        handle
            .set_remote_description(SessionDescription::offer("v=0\r\n"))
            .await
            .unwrap();
        let malformed = handle
            .add_ice_candidate(IceCandidate::new("garbage"))
            .await
            .unwrap_err();
        assert!(matches!(malformed, AgentError::MalformedCandidate(_)));

        handle
            .add_ice_candidate(IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host"))
            .await
            .unwrap();
        assert_eq!(handle.applied_candidates().len(), 1);
    }

    #[tokio::test]
    async fn test_command_round_trip_through_channel() {
        let (handle, _) = connected_handle().await;
        handle.set_event_handler(Arc::new(|event| {
            if let TransportEvent::Command { payload, reply } = event {
                let _ = reply.send(&format!("echo:{}", payload));
            }
        }));
        handle.push_command("ping");
        assert_eq!(handle.channel_acks(), vec!["echo:ping".to_string()]);
        assert_eq!(handle.channel_label(), "control");
    }

    #[tokio::test]
    async fn test_operations_fail_after_close() {
        let (handle, _) = connected_handle().await;
        handle.close().await.unwrap();
        handle.close().await.unwrap();
        assert!(handle.is_closed());
        assert!(handle
            .add_ice_candidate(IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host"))
            .await
            .is_err());
    }
}
