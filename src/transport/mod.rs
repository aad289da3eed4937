//! Transport engine interface
//!
//! The real-time media stack (ICE/DTLS/SRTP, SDP negotiation, pacing) is a
//! collaborator, not a dependency: everything the session layer needs from
//! it is expressed by the traits in this module. An engine implementation
//! adapts its peer-connection object to [`TransportHandle`] and hands
//! engine-driven events (connectivity changes, gathered candidates, inbound
//! command-channel traffic) to the handler registered by the session layer.
//!
//! The in-process [`loopback`] engine implements this surface for tests and
//! soak runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::capture::MediaFeed;
use crate::errors::AgentError;

pub mod loopback;

pub use loopback::{LoopbackEngine, LoopbackHandle};

/// Connectivity state reported by the transport engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// States after which the engine will never deliver media again.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportState::Failed | TransportState::Closed)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// SDP payload type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
            SdpType::Pranswer => "pranswer",
            SdpType::Rollback => "rollback",
        };
        write!(f, "{}", name)
    }
}

/// Session description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }
}

/// Configuration handed to the engine when a handle is created
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub stun_servers: Vec<String>,
    pub command_channel_label: String,
}

impl From<&crate::config::TransportSettings> for TransportConfig {
    fn from(settings: &crate::config::TransportSettings) -> Self {
        Self {
            stun_servers: settings.stun_servers.clone(),
            command_channel_label: settings.command_channel_label.clone(),
        }
    }
}

/// Media kinds a sender slot can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

/// Reply half of the in-session command channel.
///
/// Acknowledgments go back on the channel the command arrived on.
pub trait CommandSink: Send + Sync {
    fn send(&self, payload: &str) -> Result<(), AgentError>;
}

/// Event pushed by the engine for one handle
#[derive(Clone)]
pub enum TransportEvent {
    ConnectionState(TransportState),
    IceCandidate(IceCandidate),
    Command {
        payload: String,
        reply: Arc<dyn CommandSink>,
    },
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransportEvent::ConnectionState(state) => {
                f.debug_tuple("ConnectionState").field(state).finish()
            }
            TransportEvent::IceCandidate(candidate) => {
                f.debug_tuple("IceCandidate").field(candidate).finish()
            }
            TransportEvent::Command { payload, .. } => f
                .debug_struct("Command")
                .field("payload", payload)
                .finish_non_exhaustive(),
        }
    }
}

/// Handler the session layer registers on a handle.
///
/// Registered once per session right after handle creation, cleared on
/// teardown. Invocations must not block; handlers forward into a channel.
pub type TransportEventHandler = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// One outbound media slot on the transport
#[async_trait]
pub trait TrackSender: Send + Sync {
    fn kind(&self) -> MediaKind;
    async fn has_feed(&self) -> bool;
    /// Substitute the feed in place; `None` leaves the slot track-less.
    async fn replace_feed(&self, feed: Option<Arc<dyn MediaFeed>>) -> Result<(), AgentError>;
}

/// Peer-connection handle for one session.
///
/// Exclusively owned by the session that created it and closed before that
/// session is discarded; a handle never outlives its session.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    fn id(&self) -> &str;

    fn set_event_handler(&self, handler: TransportEventHandler);
    fn clear_event_handler(&self);

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), AgentError>;
    async fn create_answer(&self) -> Result<SessionDescription, AgentError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), AgentError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), AgentError>;

    async fn senders(&self) -> Vec<Arc<dyn TrackSender>>;
    async fn add_track(&self, feed: Arc<dyn MediaFeed>) -> Result<Arc<dyn TrackSender>, AgentError>;

    async fn state(&self) -> TransportState;
    async fn close(&self) -> Result<(), AgentError>;
}

/// Factory for per-session transport handles
#[async_trait]
pub trait TransportEngine: Send + Sync {
    async fn create_handle(
        &self,
        config: &TransportConfig,
    ) -> Result<Arc<dyn TransportHandle>, AgentError>;
}
