//! WebRTC session handling
//!
//! This module provides:
//! - the signaling message model
//! - per-peer sessions using perfect negotiation
//! - webrtc-rs backed media sessions with shared outbound tracks
//! - the control DataChannel ingress

pub mod data_channel;
pub mod media_track;
pub mod peer_connection;
pub mod session;
pub mod signaling;

#[cfg(test)]
pub(crate) mod testing;

pub use media_track::OutboundTracks;
pub use peer_connection::{PeerConnectionManager, RtcSessionFactory};
pub use session::{
    MediaSession, PeerSession, SdpKind, SessionEvent, SessionEventKind, SessionEvents, SessionFactory,
    SessionManager, SignalingState,
};
pub use signaling::{CandidateInit, PeerId, SignalMessage, SignalPayload};

use std::error::Error;
use std::fmt;

/// WebRTC-related errors
#[derive(Debug)]
pub enum WebRTCError {
    /// Malformed or incomplete signaling message
    Protocol(String),
    /// Offer/answer creation or description application failed
    Negotiation(String),
    /// ICE candidate processing failed
    Ice(String),
    /// Media track or RTP error
    Media(String),
    /// Peer connection creation failed
    ConnectionFailed(String),
    /// Outer connection or relay socket failure
    Transport(String),
    /// Session already closed
    Closed,
}

impl fmt::Display for WebRTCError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebRTCError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            WebRTCError::Negotiation(msg) => write!(f, "Negotiation error: {}", msg),
            WebRTCError::Ice(msg) => write!(f, "ICE error: {}", msg),
            WebRTCError::Media(msg) => write!(f, "Media error: {}", msg),
            WebRTCError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            WebRTCError::Transport(msg) => write!(f, "Transport error: {}", msg),
            WebRTCError::Closed => write!(f, "Session is closed"),
        }
    }
}

impl Error for WebRTCError {}
