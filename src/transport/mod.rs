//! Transport layer
//!
//! Client side of the room signaling WebSocket.

pub mod client;

pub use client::SignalingClient;
