//! Scriptable in-memory transport engine
//!
//! Records every negotiation call in a shared op log (`create_handle#N`,
//! `hN.set_remote_description`, `hN.close`, ...) so tests can assert exact
//! ordering across handles, and lets tests inject failures per operation
//! and push engine-driven events at the session layer.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::capture::MediaFeed;
use crate::errors::AgentError;
use crate::transport::{
    IceCandidate, MediaKind, SessionDescription, TrackSender, TransportConfig, TransportEngine,
    TransportEvent, TransportEventHandler, TransportHandle, TransportState,
};

type CloseHook = Arc<Mutex<Option<Box<dyn Fn(&str) + Send + Sync>>>>;

pub struct MockTransportEngine {
    ops: Arc<Mutex<Vec<String>>>,
    fail_ops: Arc<Mutex<HashSet<String>>>,
    handles: Mutex<Vec<Arc<MockTransportHandle>>>,
    close_hook: CloseHook,
    counter: AtomicUsize,
}

impl MockTransportEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ops: Arc::new(Mutex::new(Vec::new())),
            fail_ops: Arc::new(Mutex::new(HashSet::new())),
            handles: Mutex::new(Vec::new()),
            close_hook: Arc::new(Mutex::new(None)),
            counter: AtomicUsize::new(0),
        })
    }

    /// Every recorded operation, in call order.
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().expect("lock poisoned").clone()
    }

    /// Make the named operation fail until cleared.
    pub fn fail_op(&self, op: &str) {
        self.fail_ops
            .lock()
            .expect("lock poisoned")
            .insert(op.to_string());
    }

    pub fn clear_fail_op(&self, op: &str) {
        self.fail_ops.lock().expect("lock poisoned").remove(op);
    }

    /// Run `hook` with the handle id whenever a handle is closed.
    pub fn on_close(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.close_hook.lock().expect("lock poisoned") = Some(Box::new(hook));
    }

    pub fn handles(&self) -> Vec<Arc<MockTransportHandle>> {
        self.handles.lock().expect("lock poisoned").clone()
    }

    pub fn handle(&self, index: usize) -> Option<Arc<MockTransportHandle>> {
        self.handles.lock().expect("lock poisoned").get(index).cloned()
    }
}

#[async_trait]
impl TransportEngine for MockTransportEngine {
    async fn create_handle(
        &self,
        _config: &TransportConfig,
    ) -> Result<Arc<dyn TransportHandle>, AgentError> {
        if self
            .fail_ops
            .lock()
            .expect("lock poisoned")
            .contains("create_handle")
        {
            return Err(AgentError::NegotiationFailed(
                "injected create_handle failure".to_string(),
            ));
        }
        let index = self.counter.fetch_add(1, Ordering::SeqCst);
        self.ops
            .lock()
            .expect("lock poisoned")
            .push(format!("create_handle#{}", index));
        let handle = Arc::new(MockTransportHandle::with_shared(
            format!("h{}", index),
            self.ops.clone(),
            self.fail_ops.clone(),
            self.close_hook.clone(),
        ));
        self.handles.lock().expect("lock poisoned").push(handle.clone());
        Ok(handle)
    }
}

pub struct MockTransportHandle {
    id: String,
    ops: Arc<Mutex<Vec<String>>>,
    fail_ops: Arc<Mutex<HashSet<String>>>,
    close_hook: CloseHook,
    handler: Mutex<Option<TransportEventHandler>>,
    senders: Mutex<Vec<Arc<MockSender>>>,
    remote: Mutex<Option<SessionDescription>>,
    local: Mutex<Option<SessionDescription>>,
    applied: Mutex<Vec<IceCandidate>>,
    state: Mutex<TransportState>,
    closed: AtomicBool,
}

impl MockTransportHandle {
    fn with_shared(
        id: String,
        ops: Arc<Mutex<Vec<String>>>,
        fail_ops: Arc<Mutex<HashSet<String>>>,
        close_hook: CloseHook,
    ) -> Self {
        Self {
            id,
            ops,
            fail_ops,
            close_hook,
            handler: Mutex::new(None),
            senders: Mutex::new(Vec::new()),
            remote: Mutex::new(None),
            local: Mutex::new(None),
            applied: Mutex::new(Vec::new()),
            state: Mutex::new(TransportState::New),
            closed: AtomicBool::new(false),
        }
    }

    /// Standalone handle for unit tests that do not need an engine.
    pub fn standalone() -> Arc<Self> {
        Arc::new(Self::with_shared(
            "h0".to_string(),
            Arc::new(Mutex::new(Vec::new())),
            Arc::new(Mutex::new(HashSet::new())),
            Arc::new(Mutex::new(None)),
        ))
    }

    pub fn as_handle(self: Arc<Self>) -> Arc<dyn TransportHandle> {
        self
    }

    pub fn fail_op(&self, op: &str) {
        self.fail_ops
            .lock()
            .expect("lock poisoned")
            .insert(op.to_string());
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.applied.lock().expect("lock poisoned").clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().expect("lock poisoned").clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().expect("lock poisoned").clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn has_handler(&self) -> bool {
        self.handler.lock().expect("lock poisoned").is_some()
    }

    pub fn mock_senders(&self) -> Vec<Arc<MockSender>> {
        self.senders.lock().expect("lock poisoned").clone()
    }

    /// Push a connection-state change at the registered handler.
    pub fn emit_state(&self, state: TransportState) {
        *self.state.lock().expect("lock poisoned") = state;
        self.invoke(TransportEvent::ConnectionState(state));
    }

    /// Push a locally gathered candidate at the registered handler.
    pub fn emit_candidate(&self, candidate: IceCandidate) {
        self.invoke(TransportEvent::IceCandidate(candidate));
    }

    /// Deliver an in-session command; the returned sink collects the acks.
    pub fn emit_command(&self, payload: &str) -> Arc<MockCommandSink> {
        let sink = MockCommandSink::new();
        self.invoke(TransportEvent::Command {
            payload: payload.to_string(),
            reply: sink.clone(),
        });
        sink
    }

    fn invoke(&self, event: TransportEvent) {
        let handler = self.handler.lock().expect("lock poisoned").clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    fn record(&self, op: &str) {
        self.ops
            .lock()
            .expect("lock poisoned")
            .push(format!("{}.{}", self.id, op));
    }

    fn check(&self, op: &str) -> Result<(), AgentError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AgentError::TransportFailed(format!(
                "{} on closed handle {}",
                op, self.id
            )));
        }
        if self.fail_ops.lock().expect("lock poisoned").contains(op) {
            return Err(AgentError::NegotiationFailed(format!(
                "injected {} failure",
                op
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TransportHandle for MockTransportHandle {
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
        self.check("set_remote_description")?;
        self.record("set_remote_description");
        *self.remote.lock().expect("lock poisoned") = Some(desc);
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription, AgentError> {
        self.check("create_answer")?;
        if self.remote.lock().expect("lock poisoned").is_none() {
            return Err(AgentError::NegotiationFailed(
                "create_answer before remote description".to_string(),
            ));
        }
        self.record("create_answer");
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=- mock-{} 1 IN IP4 127.0.0.1\r\ns=-\r\n",
            self.id
        )))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), AgentError> {
        self.check("set_local_description")?;
        self.record("set_local_description");
        *self.local.lock().expect("lock poisoned") = Some(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), AgentError> {
        self.check("add_ice_candidate")?;
        if !candidate.candidate.starts_with("candidate:") {
            return Err(AgentError::MalformedCandidate(format!(
                "unparseable candidate line: {:?}",
                candidate.candidate
            )));
        }
        self.record("add_ice_candidate");
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
        self.check("add_track")?;
        self.record("add_track");
        let sender = Arc::new(MockSender {
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
        if self.fail_ops.lock().expect("lock poisoned").contains("close") {
            return Err(AgentError::TransportFailed("injected close failure".to_string()));
        }
        self.record("close");
        self.closed.store(true, Ordering::SeqCst);
        *self.state.lock().expect("lock poisoned") = TransportState::Closed;
        let hook = self.close_hook.lock().expect("lock poisoned");
        if let Some(hook) = hook.as_ref() {
            hook(&self.id);
        }
        Ok(())
    }
}

pub struct MockSender {
    kind: MediaKind,
    feed: Mutex<Option<Arc<dyn MediaFeed>>>,
}

impl MockSender {
    pub fn feed_id(&self) -> Option<String> {
        self.feed
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .map(|f| f.id().to_string())
    }

    pub fn current_feed(&self) -> Option<Arc<dyn MediaFeed>> {
        self.feed.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl TrackSender for MockSender {
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

/// Collects command-channel acknowledgments.
pub struct MockCommandSink {
    sent: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl MockCommandSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("lock poisoned").clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl crate::transport::CommandSink for MockCommandSink {
    fn send(&self, payload: &str) -> Result<(), AgentError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AgentError::TransportFailed("command sink closed".to_string()));
        }
        self.sent.lock().expect("lock poisoned").push(payload.to_string());
        Ok(())
    }
}
