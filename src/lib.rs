//! teleop-core - WebRTC teleoperation node
//!
//! Relays camera RTP to browser peers over WebRTC with perfect negotiation
//! and drives actuator channels from control data channel key commands.

pub mod actuator;
pub mod args;
pub mod config;
pub mod control;
pub mod relay;
pub mod transport;
pub mod web;
pub mod webrtc;

// Re-exports
pub use actuator::{ActuatorControl, ActuatorError, ActuatorRegistry, CommandResult};
pub use config::{Config, VideoCodec, WebRTCConfig};
pub use control::{CommandRouter, KeyAction, KeyCommand};
pub use relay::MediaRelay;
pub use transport::SignalingClient;
pub use webrtc::{SessionManager, SignalMessage, WebRTCError};
