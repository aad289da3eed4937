//! Session phase machine and transport state classification
//!
//! [`ConnectionStateMachine`] is the single place that knows which phase
//! transitions are legal and what a transport connection-state change means
//! for the session. It holds no locks and spawns nothing; the orchestrator
//! drives it under its session lock.

use crate::errors::AgentError;
use crate::session::state::SessionPhase;
use crate::transport::TransportState;

/// What the session should do about a transport connection-state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportReaction {
    /// Transport is up: promote the session to `Connected`
    Established,
    /// Unrecoverable: fail the session and tear down
    Fatal(String),
    /// Blip worth logging, the transport may still recover on its own
    Transient,
    /// Expected or uninteresting in the current phase
    Ignored,
}

pub struct ConnectionStateMachine {
    phase: SessionPhase,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self { phase: SessionPhase::Idle }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Move to `to`, enforcing the legal transition set.
    ///
    /// An illegal transition means orchestration has lost track of the
    /// session and is treated like any other fatal negotiation error.
    pub fn transition(&mut self, to: SessionPhase) -> Result<(), AgentError> {
        if !Self::permitted(self.phase, to) {
            return Err(AgentError::NegotiationFailed(format!(
                "illegal session transition {} -> {}",
                self.phase, to
            )));
        }
        log::debug!("Session phase {} -> {}", self.phase, to);
        self.phase = to;
        Ok(())
    }

    fn permitted(from: SessionPhase, to: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (from, to),
            (Idle, Negotiating)
                | (Negotiating, Connected)
                | (Negotiating, Failed)
                | (Negotiating, Closing)
                | (Connected, Failed)
                | (Connected, Closing)
                | (Failed, Closing)
                | (Closing, Idle)
        )
    }

    /// Classify a transport connection-state change against the current
    /// phase. Classification only; the orchestrator applies the reaction.
    pub fn classify(&self, state: TransportState) -> TransportReaction {
        match state {
            TransportState::Connected => match self.phase {
                SessionPhase::Negotiating | SessionPhase::Connected => {
                    TransportReaction::Established
                }
                _ => TransportReaction::Ignored,
            },
            TransportState::Failed => {
                TransportReaction::Fatal("transport entered failed state".to_string())
            }
            TransportState::Closed => {
                if self.phase.is_active() {
                    TransportReaction::Fatal("transport closed unexpectedly".to_string())
                } else {
                    // Our own teardown closing the handle.
                    TransportReaction::Ignored
                }
            }
            TransportState::Disconnected => TransportReaction::Transient,
            TransportState::New | TransportState::Connecting => TransportReaction::Ignored,
        }
    }
}
