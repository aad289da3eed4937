use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),
    #[error("capture device busy: {0}")]
    DeviceBusy(String),
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),
    #[error("transport failed: {0}")]
    TransportFailed(String),
    #[error("signaling relay disconnected: {0}")]
    RelayDisconnected(String),
    #[error("command '{command}' rejected in phase {phase}")]
    InvalidCommand { command: String, phase: String },
    #[error("malformed candidate: {0}")]
    MalformedCandidate(String),
    #[error("signaling error: {0}")]
    Signaling(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl AgentError {
    /// Whether this error must end the active session with a full cleanup.
    ///
    /// Capture-layer failures degrade the session instead of killing it;
    /// transport and relay failures never leave a session half-alive.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            AgentError::NegotiationFailed(_)
                | AgentError::TransportFailed(_)
                | AgentError::RelayDisconnected(_)
        )
    }

    /// Whether this error leaves the session running without video.
    pub fn is_capture_degradation(&self) -> bool {
        matches!(
            self,
            AgentError::CaptureUnavailable(_) | AgentError::DeviceBusy(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(AgentError::NegotiationFailed("sdp".into()).is_fatal_to_session());
        assert!(AgentError::TransportFailed("ice".into()).is_fatal_to_session());
        assert!(AgentError::RelayDisconnected("eof".into()).is_fatal_to_session());

        assert!(!AgentError::CaptureUnavailable("no device".into()).is_fatal_to_session());
        assert!(!AgentError::MalformedCandidate("bad".into()).is_fatal_to_session());
        assert!(!AgentError::InvalidCommand {
            command: "start-video".into(),
            phase: "Negotiating".into(),
        }
        .is_fatal_to_session());
    }

    #[test]
    fn test_capture_degradation_classification() {
        assert!(AgentError::CaptureUnavailable("no device".into()).is_capture_degradation());
        assert!(AgentError::DeviceBusy("held".into()).is_capture_degradation());
        assert!(!AgentError::NegotiationFailed("sdp".into()).is_capture_degradation());
    }

    #[test]
    fn test_display_messages() {
        let err = AgentError::InvalidCommand {
            command: "start-video".into(),
            phase: "Negotiating".into(),
        };
        assert_eq!(
            err.to_string(),
            "command 'start-video' rejected in phase Negotiating"
        );

        let err = AgentError::DeviceBusy("camera 0 already claimed".into());
        assert!(err.to_string().contains("busy"));
    }
}
