//! Agent run loop
//!
//! Owns one robot's lifecycle against the relay: connect, register,
//! dispatch relay traffic into the session orchestrator, and reconnect
//! with capped exponential backoff when the relay drops.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};

use crate::capture::FrameSourceProvider;
use crate::config::AgentConfig;
use crate::errors::AgentError;
use crate::session::SessionOrchestrator;
use crate::signaling::{MessageBus, SignalMessage, SignalingConnection, WsBus};
use crate::transport::{IceCandidate, TransportEngine};

/// Cloneable signal to stop a running agent.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

pub struct Agent {
    config: AgentConfig,
    engine: Arc<dyn TransportEngine>,
    provider: Arc<dyn FrameSourceProvider>,
    current: Mutex<Option<SessionOrchestrator>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        engine: Arc<dyn TransportEngine>,
        provider: Arc<dyn FrameSourceProvider>,
    ) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            config,
            engine,
            provider,
            current: Mutex::new(None),
            shutdown_tx: Arc::new(tx),
            shutdown_rx: rx,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Orchestrator for the live relay connection, if one is up.
    pub async fn orchestrator(&self) -> Option<SessionOrchestrator> {
        self.current.lock().await.clone()
    }

    /// Connect-and-serve until shutdown, reconnecting with backoff.
    pub async fn run(&self) -> Result<(), AgentError> {
        let initial = Duration::from_millis(self.config.signaling.reconnect_initial_ms);
        let max = Duration::from_millis(self.config.signaling.reconnect_max_ms);
        let mut backoff = initial;
        let mut shutdown = self.shutdown_rx.clone();

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            match WsBus::connect(&self.config.signaling.url).await {
                Ok(bus) => {
                    backoff = initial;
                    match self.serve_connection(Arc::new(bus)).await {
                        Ok(true) => return Ok(()),
                        Ok(false) => {}
                        Err(e) => log::warn!("Relay session ended: {}", e),
                    }
                }
                Err(e) => log::warn!("Relay connect failed: {}", e),
            }

            log::info!("Reconnecting to relay in {:?}", backoff);
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
            backoff = (backoff * 2).min(max);
        }
    }

    /// Serve one already-established relay connection until it drops or
    /// shutdown is requested. Used directly by tests and soak runs.
    pub async fn run_on_bus(&self, bus: Arc<dyn MessageBus>) -> Result<(), AgentError> {
        self.serve_connection(bus).await.map(|_| ())
    }

    /// Returns `Ok(true)` when the agent should stop, `Ok(false)` when the
    /// connection was lost and a reconnect is in order.
    async fn serve_connection(&self, bus: Arc<dyn MessageBus>) -> Result<bool, AgentError> {
        let connection = Arc::new(SignalingConnection::new(bus));
        let orchestrator = SessionOrchestrator::new(
            self.engine.clone(),
            self.provider.clone(),
            connection.clone(),
            &self.config,
        );
        *self.current.lock().await = Some(orchestrator.clone());

        if let Err(e) = connection.send(SignalMessage::Register).await {
            *self.current.lock().await = None;
            return Err(e);
        }
        log::info!("Registered with relay");

        let mut shutdown = self.shutdown_rx.clone();
        let stop = loop {
            tokio::select! {
                message = connection.recv() => match message {
                    Some(message) => self.dispatch(&orchestrator, message).await,
                    None => {
                        log::warn!("Relay connection lost");
                        orchestrator.on_relay_disconnected().await;
                        break false;
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("Shutdown requested, closing session");
                        orchestrator.cleanup(true).await;
                        break true;
                    }
                }
            }
        };

        *self.current.lock().await = None;
        Ok(stop)
    }

    async fn dispatch(&self, orchestrator: &SessionOrchestrator, message: SignalMessage) {
        match message {
            SignalMessage::Offer {
                description,
                from_viewer_id,
            } => orchestrator.on_offer(description, &from_viewer_id).await,
            SignalMessage::Candidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
                from,
                ..
            } => {
                let candidate = IceCandidate {
                    candidate,
                    sdp_mid,
                    sdp_mline_index,
                };
                orchestrator.on_candidate(candidate, from.as_deref()).await;
            }
            SignalMessage::PeerDisconnected { viewer_id } => {
                orchestrator.on_peer_disconnected(&viewer_id).await;
            }
            other => log::debug!("Ignoring relay message '{}'", other.event_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SyntheticProvider;
    use crate::testing::memory_bus_pair;
    use crate::transport::{LoopbackEngine, SessionDescription};

    fn test_agent() -> Arc<Agent> {
        Arc::new(Agent::new(
            AgentConfig::default(),
            Arc::new(LoopbackEngine::new()),
            Arc::new(SyntheticProvider::new()),
        ))
    }

    #[tokio::test]
    async fn test_registers_on_connect_and_rearms_after_answering() {
        let (agent_bus, relay_bus) = memory_bus_pair();
        let agent = test_agent();
        let handle = agent.shutdown_handle();

        let runner = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.run_on_bus(agent_bus).await })
        };

        let relay = SignalingConnection::new(relay_bus);
        assert_eq!(relay.recv().await, Some(SignalMessage::Register));

        relay
            .send(SignalMessage::Offer {
                description: SessionDescription::offer("v=0\r\n"),
                from_viewer_id: "viewer-1".to_string(),
            })
            .await
            .unwrap();

        match relay.recv().await {
            Some(SignalMessage::Answer { to_viewer_id, .. }) => {
                assert_eq!(to_viewer_id, "viewer-1");
            }
            other => panic!("expected an answer, got {:?}", other),
        }
        assert_eq!(relay.recv().await, Some(SignalMessage::RobotReadyForOffers));

        handle.shutdown();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_relay_loss_ends_the_serve_call() {
        let (agent_bus, relay_bus) = memory_bus_pair();
        let agent = test_agent();

        let runner = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.run_on_bus(agent_bus).await })
        };

        let relay = SignalingConnection::new(relay_bus.clone());
        assert_eq!(relay.recv().await, Some(SignalMessage::Register));

        relay_bus.close();
        runner.await.unwrap().unwrap();
        assert!(agent.orchestrator().await.is_none());
    }
}
