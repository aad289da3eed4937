//! Command-channel vocabulary
//!
//! Viewers drive the robot over the transport's data channel with small
//! text commands. Recognized commands gate the video track; anything else
//! is echoed back so operators can probe channel liveness.

pub const START_VIDEO: &str = "start-video";
pub const STOP_VIDEO: &str = "stop-video";

pub const VIDEO_STARTED_ACK: &str = "video-started-ack";
pub const VIDEO_STOPPED_ACK: &str = "video-stopped-ack";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    StartVideo,
    StopVideo,
    /// Unrecognized payload, echoed back verbatim
    Passthrough(String),
}

impl SessionCommand {
    pub fn parse(payload: &str) -> Self {
        match payload {
            START_VIDEO => SessionCommand::StartVideo,
            STOP_VIDEO => SessionCommand::StopVideo,
            other => SessionCommand::Passthrough(other.to_string()),
        }
    }

    /// Name used in logs and in `InvalidCommand` errors.
    pub fn name(&self) -> &str {
        match self {
            SessionCommand::StartVideo => START_VIDEO,
            SessionCommand::StopVideo => STOP_VIDEO,
            SessionCommand::Passthrough(payload) => payload,
        }
    }

    /// Reply sent when the command was carried out.
    pub fn success_ack(&self) -> String {
        match self {
            SessionCommand::StartVideo => VIDEO_STARTED_ACK.to_string(),
            SessionCommand::StopVideo => VIDEO_STOPPED_ACK.to_string(),
            SessionCommand::Passthrough(payload) => format!("echo:{}", payload),
        }
    }
}

/// Reply for a command refused because the session cannot take it now.
pub fn rejection_ack(payload: &str) -> String {
    format!("rejected:{}", payload)
}

/// Reply for a command that was accepted but failed while executing.
pub fn failure_ack(reason: &str) -> String {
    format!("error:{}", reason)
}
