//! Test doubles for the external collaborators
//!
//! Every external collaborator of the agent (transport engine, frame
//! source, relay) has an in-memory stand-in here so session behavior can be
//! driven and asserted without hardware or a network.

pub mod mock_transport;
pub mod scripted_source;

pub use mock_transport::{MockCommandSink, MockSender, MockTransportEngine, MockTransportHandle};
pub use scripted_source::ScriptedProvider;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::errors::AgentError;
use crate::signaling::{MessageBus, SignalMessage, SignalSender};

/// One end of an in-memory relay connection.
pub struct MemoryBus {
    tx: StdMutex<Option<mpsc::UnboundedSender<String>>>,
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl MemoryBus {
    pub async fn send_text(&self, text: String) -> Result<(), AgentError> {
        let sender = self.tx.lock().expect("lock poisoned").clone();
        match sender {
            Some(tx) => tx
                .send(text)
                .map_err(|_| AgentError::RelayDisconnected("peer bus closed".to_string())),
            None => Err(AgentError::RelayDisconnected("bus closed".to_string())),
        }
    }

    pub async fn recv_text(&self) -> Option<String> {
        self.rx.lock().await.recv().await
    }

    /// Simulate losing this end: the peer sees end-of-stream and sends to
    /// this end start failing.
    pub fn close(&self) {
        self.tx.lock().expect("lock poisoned").take();
        if let Ok(mut rx) = self.rx.try_lock() {
            rx.close();
        }
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn send_text(&self, text: String) -> Result<(), AgentError> {
        MemoryBus::send_text(self, text).await
    }

    async fn recv_text(&self) -> Option<String> {
        MemoryBus::recv_text(self).await
    }
}

/// Connected pair of in-memory buses: what one sends, the other receives.
pub fn memory_bus_pair() -> (Arc<MemoryBus>, Arc<MemoryBus>) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let a = Arc::new(MemoryBus {
        tx: StdMutex::new(Some(b_tx)),
        rx: Mutex::new(a_rx),
    });
    let b = Arc::new(MemoryBus {
        tx: StdMutex::new(Some(a_tx)),
        rx: Mutex::new(b_rx),
    });
    (a, b)
}

/// Signal sender that records what the session layer emits.
pub struct RecordingSignals {
    sent: StdMutex<Vec<SignalMessage>>,
    fail: AtomicBool,
}

impl Default for RecordingSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSignals {
    pub fn new() -> Self {
        Self {
            sent: StdMutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn sent(&self) -> Vec<SignalMessage> {
        self.sent.lock().expect("lock poisoned").clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Answers emitted so far, as (viewer id, sdp) pairs.
    pub fn answers(&self) -> Vec<(String, String)> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                SignalMessage::Answer {
                    description,
                    to_viewer_id,
                } => Some((to_viewer_id, description.sdp)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SignalSender for RecordingSignals {
    async fn send(&self, message: SignalMessage) -> Result<(), AgentError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AgentError::RelayDisconnected(
                "injected signaling failure".to_string(),
            ));
        }
        self.sent.lock().expect("lock poisoned").push(message);
        Ok(())
    }
}
