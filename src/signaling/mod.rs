//! Signaling relay connectivity: wire schema, typed connection, WebSocket bus

pub mod client;
pub mod messages;
pub mod ws;

pub use client::{MessageBus, SignalSender, SignalingConnection};
pub use messages::SignalMessage;
pub use ws::WsBus;
