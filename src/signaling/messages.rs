//! Frames exchanged with the signaling relay
//!
//! The relay forwards frames between the two participants of a room
//! verbatim, so these shapes are the browser client's shapes:
//! `{type: "offer", sdp: {type, sdp}}`, `{type: "ice", candidate: {...}}`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Why an inbound frame could not be turned into a `SignalingMessage`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Malformed signaling frame: {0}")]
    Malformed(String),

    #[error("Unknown signaling frame type: {0}")]
    UnknownType(String),
}

// ============================================================================
// SIGNALING MESSAGE
// ============================================================================

/// All frames understood by the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingMessage {
    /// Another participant joined the room (sent by the relay)
    PeerJoin,

    /// The other participant's socket went away (sent by the relay)
    PeerLeave,

    /// Session description of the initiator
    Offer { sdp: RTCSessionDescription },

    /// Session description of the responder
    Answer { sdp: RTCSessionDescription },

    /// Trickled connectivity candidate
    Ice { candidate: RTCIceCandidateInit },
}

const KNOWN_TYPES: [&str; 5] = ["peer-join", "peer-leave", "offer", "answer", "ice"];

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl SignalingMessage {
    /// Decodes one text frame. Unknown tags are rejected, not defaulted.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;

        let envelope = Envelope::deserialize(&value)
            .map_err(|e| FrameError::Malformed(e.to_string()))?;
        let kind = envelope
            .kind
            .ok_or_else(|| FrameError::Malformed("missing type".to_string()))?;

        if !KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(FrameError::UnknownType(kind));
        }

        serde_json::from_value(value).map_err(|e| FrameError::Malformed(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Wire tag of this frame
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PeerJoin => "peer-join",
            Self::PeerLeave => "peer-leave",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Ice { .. } => "ice",
        }
    }
}
