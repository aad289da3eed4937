//! Session lifecycle: phases, the per-session state machine, orchestration

pub mod connection;
pub mod orchestrator;
pub mod state;

pub use connection::{ConnectionStateMachine, TransportReaction};
pub use orchestrator::{SessionOrchestrator, SessionSnapshot};
pub use state::{PeerSession, SessionPhase, StateEvent};
