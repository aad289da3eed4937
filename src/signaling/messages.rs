//! Wire schema for relay traffic
//!
//! Every frame on the signaling bus is one JSON object tagged by an `event`
//! field. Field names follow the relay's camelCase convention; the SDP
//! `type` field rides alongside the tag without clashing with it.

use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::transport::{IceCandidate, SessionDescription};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Announce this agent to the relay
    Register,
    /// Tell the relay the agent can take the next viewer offer
    RobotReadyForOffers,
    /// Viewer offer, forwarded by the relay
    Offer {
        #[serde(flatten)]
        description: SessionDescription,
        #[serde(rename = "fromViewerId")]
        from_viewer_id: String,
    },
    /// Agent answer, routed back to one viewer
    Answer {
        #[serde(flatten)]
        description: SessionDescription,
        #[serde(rename = "toViewerId")]
        to_viewer_id: String,
    },
    /// Connectivity candidate, either direction
    Candidate {
        candidate: String,
        #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none", default)]
        sdp_mid: Option<String>,
        #[serde(
            rename = "sdpMLineIndex",
            skip_serializing_if = "Option::is_none",
            default
        )]
        sdp_mline_index: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        to: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        from: Option<String>,
    },
    /// Relay noticed the session's viewer went away
    PeerDisconnected {
        #[serde(rename = "viewerId")]
        viewer_id: String,
    },
}

impl SignalMessage {
    pub fn answer(description: SessionDescription, to_viewer_id: impl Into<String>) -> Self {
        SignalMessage::Answer {
            description,
            to_viewer_id: to_viewer_id.into(),
        }
    }

    /// Outbound candidate addressed to the session's viewer.
    pub fn candidate_to(viewer_id: impl Into<String>, candidate: IceCandidate) -> Self {
        SignalMessage::Candidate {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            to: Some(viewer_id.into()),
            from: None,
        }
    }

    /// Tag string, for logs.
    pub fn event_name(&self) -> &'static str {
        match self {
            SignalMessage::Register => "register",
            SignalMessage::RobotReadyForOffers => "robot-ready-for-offers",
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::Candidate { .. } => "candidate",
            SignalMessage::PeerDisconnected { .. } => "peer-disconnected",
        }
    }

    pub fn decode(raw: &str) -> Result<Self, AgentError> {
        serde_json::from_str(raw)
            .map_err(|e| AgentError::Signaling(format!("undecodable relay frame: {}", e)))
    }

    pub fn encode(&self) -> Result<String, AgentError> {
        serde_json::to_string(self)
            .map_err(|e| AgentError::Signaling(format!("unencodable message: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SdpType;

    #[test]
    fn test_decode_offer_frame() {
        let raw = r#"{"event":"offer","sdp":"v=0\r\no=viewer","type":"offer","fromViewerId":"viewer-7"}"#;
        let msg = SignalMessage::decode(raw).unwrap();
        match msg {
            SignalMessage::Offer {
                description,
                from_viewer_id,
            } => {
                assert_eq!(description.sdp_type, SdpType::Offer);
                assert!(description.sdp.starts_with("v=0"));
                assert_eq!(from_viewer_id, "viewer-7");
            }
            other => panic!("decoded wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_encode_answer_frame_field_names() {
        let msg = SignalMessage::answer(SessionDescription::answer("v=0\r\n"), "viewer-7");
        let json = msg.encode().unwrap();
        assert!(json.contains("\"event\":\"answer\""));
        assert!(json.contains("\"type\":\"answer\""));
        assert!(json.contains("\"toViewerId\":\"viewer-7\""));
    }

    #[test]
    fn test_candidate_uses_relay_casing_and_drops_empty_routing() {
        let msg = SignalMessage::candidate_to(
            "viewer-7",
            IceCandidate::new("candidate:1 1 udp 2122260223 192.168.1.5 50000 typ host"),
        );
        let json = msg.encode().unwrap();
        assert!(json.contains("\"sdpMid\":\"0\""));
        assert!(json.contains("\"sdpMLineIndex\":0"));
        assert!(json.contains("\"to\":\"viewer-7\""));
        assert!(!json.contains("\"from\""));
    }

    #[test]
    fn test_decode_candidate_without_routing_fields() {
        let raw = r#"{"event":"candidate","candidate":"candidate:2 1 udp 1 10.0.0.2 5001 typ host"}"#;
        match SignalMessage::decode(raw).unwrap() {
            SignalMessage::Candidate {
                sdp_mid,
                sdp_mline_index,
                from,
                ..
            } => {
                assert_eq!(sdp_mid, None);
                assert_eq!(sdp_mline_index, None);
                assert_eq!(from, None);
            }
            other => panic!("decoded wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_unit_events_round_trip() {
        for msg in [SignalMessage::Register, SignalMessage::RobotReadyForOffers] {
            let json = msg.encode().unwrap();
            assert_eq!(SignalMessage::decode(&json).unwrap(), msg);
        }
        assert_eq!(
            SignalMessage::Register.encode().unwrap(),
            r#"{"event":"register"}"#
        );
    }

    #[test]
    fn test_unknown_event_is_a_signaling_error() {
        let err = SignalMessage::decode(r#"{"event":"telemetry","x":1}"#).unwrap_err();
        assert!(matches!(err, AgentError::Signaling(_)));
    }

    #[test]
    fn test_peer_disconnected_frame() {
        let raw = r#"{"event":"peer-disconnected","viewerId":"viewer-7"}"#;
        match SignalMessage::decode(raw).unwrap() {
            SignalMessage::PeerDisconnected { viewer_id } => assert_eq!(viewer_id, "viewer-7"),
            other => panic!("decoded wrong variant: {:?}", other),
        }
    }
}
