//! Signaling Protocol
//!
//! Room-scoped messages exchanged with the signaling server:
//! `{type, from, to, room, <payload>}` where the payload is `offer: {sdp}`,
//! `answer: {sdp}` or `candidate: {candidate, sdpMid, sdpMLineIndex}`.
//! Messages are validated into [`SignalMessage`] at the boundary.

use super::WebRTCError;
use serde::{Deserialize, Serialize};

/// Opaque remote participant identifier
pub type PeerId = String;

/// ICE candidate as carried on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

/// Type-specific part of a signaling message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalPayload {
    Join,
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate(CandidateInit),
    Leave,
}

/// A validated signaling message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMessage {
    pub from: PeerId,
    pub to: PeerId,
    pub room: String,
    pub payload: SignalPayload,
}

#[derive(Debug, Serialize, Deserialize)]
struct SdpBody {
    sdp: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    room: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    offer: Option<SdpBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    answer: Option<SdpBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    candidate: Option<CandidateInit>,
}

impl SignalMessage {
    pub fn new(from: &str, to: &str, room: &str, payload: SignalPayload) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            room: room.to_string(),
            payload,
        }
    }

    /// Room announcement (not addressed to anyone)
    pub fn join(from: &str, room: &str) -> Self {
        Self::new(from, "", room, SignalPayload::Join)
    }

    /// Wire name of the message type
    pub fn kind(&self) -> &'static str {
        match self.payload {
            SignalPayload::Join => "join",
            SignalPayload::Offer { .. } => "offer",
            SignalPayload::Answer { .. } => "answer",
            SignalPayload::Candidate(_) => "candidate",
            SignalPayload::Leave => "leave",
        }
    }

    /// Parse and validate a signaling message from JSON
    pub fn from_json(json: &str) -> Result<Self, WebRTCError> {
        let wire: WireMessage = serde_json::from_str(json)
            .map_err(|e| WebRTCError::Protocol(format!("Invalid signaling message: {}", e)))?;

        if wire.from.is_empty() {
            return Err(WebRTCError::Protocol(format!("{} message without sender", wire.kind)));
        }

        let payload = match wire.kind.as_str() {
            "join" => SignalPayload::Join,
            "leave" => SignalPayload::Leave,
            "offer" => match wire.offer {
                Some(body) if !body.sdp.is_empty() => SignalPayload::Offer { sdp: body.sdp },
                _ => return Err(WebRTCError::Protocol("offer without sdp".to_string())),
            },
            "answer" => match wire.answer {
                Some(body) if !body.sdp.is_empty() => SignalPayload::Answer { sdp: body.sdp },
                _ => return Err(WebRTCError::Protocol("answer without sdp".to_string())),
            },
            "candidate" => match wire.candidate {
                Some(candidate) => SignalPayload::Candidate(candidate),
                None => return Err(WebRTCError::Protocol("candidate without payload".to_string())),
            },
            other => return Err(WebRTCError::Protocol(format!("Unknown message type: {}", other))),
        };

        Ok(Self {
            from: wire.from,
            to: wire.to,
            room: wire.room,
            payload,
        })
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, WebRTCError> {
        let mut wire = WireMessage {
            kind: self.kind().to_string(),
            from: self.from.clone(),
            to: self.to.clone(),
            room: self.room.clone(),
            offer: None,
            answer: None,
            candidate: None,
        };
        match &self.payload {
            SignalPayload::Offer { sdp } => wire.offer = Some(SdpBody { sdp: sdp.clone() }),
            SignalPayload::Answer { sdp } => wire.answer = Some(SdpBody { sdp: sdp.clone() }),
            SignalPayload::Candidate(candidate) => wire.candidate = Some(candidate.clone()),
            SignalPayload::Join | SignalPayload::Leave => {}
        }

        serde_json::to_string(&wire)
            .map_err(|e| WebRTCError::Protocol(format!("Failed to serialize message: {}", e)))
    }
}
