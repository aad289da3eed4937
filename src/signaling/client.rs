//! Typed connection to the signaling relay
//!
//! [`SignalingConnection`] speaks [`SignalMessage`] over any raw text bus.
//! Production uses the WebSocket bus in [`crate::signaling::ws`]; tests run
//! the same code over an in-memory channel pair.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::AgentError;
use crate::signaling::messages::SignalMessage;

/// Outbound half of the relay connection, as seen by the session layer.
#[async_trait]
pub trait SignalSender: Send + Sync {
    async fn send(&self, message: SignalMessage) -> Result<(), AgentError>;
}

/// Raw bidirectional text bus to the relay.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), AgentError>;
    /// `None` once the bus has closed.
    async fn recv_text(&self) -> Option<String>;
}

pub struct SignalingConnection {
    bus: Arc<dyn MessageBus>,
}

impl SignalingConnection {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    pub async fn send(&self, message: SignalMessage) -> Result<(), AgentError> {
        let raw = message.encode()?;
        log::debug!("-> relay: {}", message.event_name());
        self.bus.send_text(raw).await
    }

    /// Next decoded relay message. Frames that fail to decode are logged
    /// and skipped; `None` means the relay connection is gone.
    pub async fn recv(&self) -> Option<SignalMessage> {
        loop {
            let raw = self.bus.recv_text().await?;
            match SignalMessage::decode(&raw) {
                Ok(message) => {
                    log::debug!("<- relay: {}", message.event_name());
                    return Some(message);
                }
                Err(e) => log::warn!("Dropping relay frame: {}", e),
            }
        }
    }
}

#[async_trait]
impl SignalSender for SignalingConnection {
    async fn send(&self, message: SignalMessage) -> Result<(), AgentError> {
        SignalingConnection::send(self, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::memory_bus_pair;

    #[tokio::test]
    async fn test_send_and_recv_round_trip() {
        let (agent_bus, relay_bus) = memory_bus_pair();
        let agent = SignalingConnection::new(agent_bus);
        let relay = SignalingConnection::new(relay_bus);

        agent.send(SignalMessage::Register).await.unwrap();
        assert_eq!(relay.recv().await, Some(SignalMessage::Register));
    }

    #[tokio::test]
    async fn test_recv_skips_undecodable_frames() {
        let (agent_bus, relay_bus) = memory_bus_pair();
        let agent = SignalingConnection::new(agent_bus);

        relay_bus.send_text("not json at all".to_string()).await.unwrap();
        relay_bus
            .send_text(r#"{"event":"peer-disconnected","viewerId":"v1"}"#.to_string())
            .await
            .unwrap();

        let msg = agent.recv().await.unwrap();
        assert_eq!(
            msg,
            SignalMessage::PeerDisconnected {
                viewer_id: "v1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_recv_returns_none_when_bus_closes() {
        let (agent_bus, relay_bus) = memory_bus_pair();
        let agent = SignalingConnection::new(agent_bus);

        relay_bus.close();
        assert_eq!(agent.recv().await, None);
    }

    #[tokio::test]
    async fn test_send_fails_after_close() {
        let (agent_bus, relay_bus) = memory_bus_pair();
        let agent = SignalingConnection::new(agent_bus);

        relay_bus.close();
        let err = agent.send(SignalMessage::Register).await.unwrap_err();
        assert!(matches!(err, AgentError::RelayDisconnected(_)));
    }
}
