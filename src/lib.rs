//! Rovercam: robot-side session agent for real-time video streaming
//!
//! This crate implements the robot half of a viewer/robot streaming pair:
//! it registers with a signaling relay, answers one viewer offer at a time,
//! relays ICE candidates in order, manages the outgoing video track, and
//! serves the in-session command channel.
//!
//! # Features
//! - Single-active-session orchestration with strict phase transitions
//! - Offer/answer negotiation that survives supersession and relay loss
//! - Ordered candidate relay with early-arrival queueing
//! - Video track control with filler frames when capture degrades
//! - Command channel handling (`start-video`, `stop-video`, echo)
//! - Reconnecting websocket signaling client
//!
//! # Usage
//! ```rust,ignore
//! use std::sync::Arc;
//! use rovercam::{Agent, AgentConfig};
//! use rovercam::capture::SyntheticProvider;
//! use rovercam::transport::LoopbackEngine;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     rovercam::init_logging();
//!     let agent = Agent::new(
//!         AgentConfig::load_or_default(),
//!         Arc::new(LoopbackEngine::new()),
//!         Arc::new(SyntheticProvider::new()),
//!     );
//!     agent.run().await?;
//!     Ok(())
//! }
//! ```
pub mod agent;
pub mod candidates;
pub mod capture;
pub mod commands;
pub mod config;
pub mod errors;
pub mod session;
pub mod signaling;
pub mod track;
pub mod transport;

// Testing utilities - mock engine, scripted capture, in-memory signaling
pub mod testing;

// Re-exports for convenience
pub use agent::{Agent, ShutdownHandle};
pub use config::AgentConfig;
pub use errors::AgentError;
pub use session::{SessionOrchestrator, SessionPhase, SessionSnapshot, StateEvent};
pub use signaling::SignalMessage;
pub use track::TrackController;
pub use transport::{TransportEngine, TransportHandle, TransportState};

/// Initialize logging for the agent
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "rovercam=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}
