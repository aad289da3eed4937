//! Session phases and telemetry event types

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle phase of the one streaming session the agent will hold.
///
/// `Failed` is always momentary: the orchestrator records it, emits the
/// telemetry event, and immediately drives teardown back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Negotiating,
    Connected,
    Closing,
    Failed,
}

impl SessionPhase {
    /// Commands are only honored on an established session.
    pub fn accepts_commands(&self) -> bool {
        matches!(self, SessionPhase::Connected)
    }

    /// A session exists and has not begun teardown.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionPhase::Negotiating | SessionPhase::Connected)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Negotiating => "negotiating",
            SessionPhase::Connected => "connected",
            SessionPhase::Closing => "closing",
            SessionPhase::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Identity of one viewer-initiated session
#[derive(Debug, Clone, Serialize)]
pub struct PeerSession {
    pub id: Uuid,
    pub viewer_id: String,
    pub created_at: DateTime<Utc>,
}

impl PeerSession {
    pub fn new(viewer_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            viewer_id: viewer_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Broadcast on every phase change so embedders can observe the session
/// without polling.
#[derive(Debug, Clone, Serialize)]
pub struct StateEvent {
    pub session_id: Uuid,
    pub viewer_id: String,
    pub phase: SessionPhase,
    /// True when the session carries filler video because capture was lost
    pub degraded: bool,
    /// Human-readable cause, set on `Failed` and `Closing`
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_gate_is_connected_only() {
        assert!(SessionPhase::Connected.accepts_commands());
        assert!(!SessionPhase::Negotiating.accepts_commands());
        assert!(!SessionPhase::Idle.accepts_commands());
        assert!(!SessionPhase::Closing.accepts_commands());
        assert!(!SessionPhase::Failed.accepts_commands());
    }

    #[test]
    fn test_active_phases() {
        assert!(SessionPhase::Negotiating.is_active());
        assert!(SessionPhase::Connected.is_active());
        assert!(!SessionPhase::Idle.is_active());
        assert!(!SessionPhase::Closing.is_active());
        assert!(!SessionPhase::Failed.is_active());
    }

    #[test]
    fn test_phase_display_matches_wire_casing() {
        assert_eq!(SessionPhase::Negotiating.to_string(), "negotiating");
        let json = serde_json::to_string(&SessionPhase::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
    }

    #[test]
    fn test_peer_sessions_get_unique_ids() {
        let a = PeerSession::new("viewer-1");
        let b = PeerSession::new("viewer-1");
        assert_ne!(a.id, b.id);
        assert_eq!(a.viewer_id, "viewer-1");
    }
}
