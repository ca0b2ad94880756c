//! Configuration management for teleop-core

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Video codec carried on the outbound video track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    VP8,
    VP9,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::VP8 => "vp8",
            VideoCodec::VP9 => "vp9",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/H264",
            VideoCodec::VP8 => "video/VP8",
            VideoCodec::VP9 => "video/VP9",
        }
    }

    pub fn sdp_fmtp_line(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f",
            VideoCodec::VP8 => "",
            VideoCodec::VP9 => "profile-id=0",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Signaling server connection
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// WebRTC configuration
    #[serde(default)]
    pub webrtc: WebRTCConfig,

    /// RTP relay sockets
    #[serde(default)]
    pub relay: RelayConfig,

    /// Actuator channels
    #[serde(default)]
    pub actuators: ActuatorConfig,

    /// Control-channel key table
    #[serde(default)]
    pub controls: ControlsConfig,

    /// HTTP control API
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// WebSocket URL of the signaling server
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Room to announce in
    #[serde(default = "default_room")]
    pub room: String,

    /// Our peer ID (generated when empty)
    #[serde(default)]
    pub peer_id: String,

    /// Delay before reconnecting after the connection drops
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            room: default_room(),
            peer_id: String::new(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// WebRTC session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRTCConfig {
    /// STUN/TURN servers handed to every peer connection
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServerConfig>,

    /// Video codec selection
    #[serde(default)]
    pub video_codec: VideoCodec,

    /// Negotiated RTP payload type for video
    #[serde(default = "default_video_payload_type")]
    pub video_payload_type: u8,

    /// Negotiated RTP payload type for audio (Opus)
    #[serde(default = "default_audio_payload_type")]
    pub audio_payload_type: u8,
}

impl Default for WebRTCConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            video_codec: VideoCodec::H264,
            video_payload_type: default_video_payload_type(),
            audio_payload_type: default_audio_payload_type(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// UDP address the video encoder sends RTP to
    #[serde(default = "default_video_listen")]
    pub video_listen: String,

    /// UDP address the audio encoder sends RTP to
    #[serde(default = "default_audio_listen")]
    pub audio_listen: String,

    /// Per-subscriber queue depth
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,

    /// Delay between track write retries
    #[serde(default = "default_write_retry_ms")]
    pub write_retry_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            video_listen: default_video_listen(),
            audio_listen: default_audio_listen(),
            subscriber_queue: default_subscriber_queue(),
            write_retry_ms: default_write_retry_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorConfig {
    /// Movement tick interval
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Configured channels
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            channels: default_channels(),
        }
    }
}

/// One motor/servo axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: u32,
    /// Lower bound in degrees
    pub min: f64,
    /// Upper bound in degrees
    pub max: f64,
    /// Position assumed on first use
    pub default: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlsConfig {
    #[serde(default = "default_bindings")]
    pub bindings: Vec<KeyBindingConfig>,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            bindings: default_bindings(),
        }
    }
}

/// Key table entry. One move is a single actuator command, several form a drive command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBindingConfig {
    pub key: String,
    pub moves: Vec<AxisMoveConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisMoveConfig {
    pub channel: u32,
    pub direction: i32,
    /// Degrees per second
    pub speed: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Serve the control API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP bind address
    #[serde(default = "default_http_host")]
    pub host: String,

    /// HTTP port
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_http_host(),
            port: default_http_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling: SignalingConfig::default(),
            webrtc: WebRTCConfig::default(),
            relay: RelayConfig::default(),
            actuators: ActuatorConfig::default(),
            controls: ControlsConfig::default(),
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        let endpoint = self.signaling.endpoint.as_str();
        if !endpoint.starts_with("ws://") && !endpoint.starts_with("wss://") {
            return Err("Signaling endpoint must be a ws:// or wss:// URL".into());
        }

        if self.signaling.room.is_empty() {
            return Err("Signaling room must not be empty".into());
        }

        if self.webrtc.video_payload_type > 127 || self.webrtc.audio_payload_type > 127 {
            return Err("RTP payload types must be in 0..=127".into());
        }

        if self.relay.video_listen.parse::<std::net::SocketAddr>().is_err() {
            return Err("Relay video_listen must be in ip:port format".into());
        }
        if self.relay.audio_listen.parse::<std::net::SocketAddr>().is_err() {
            return Err("Relay audio_listen must be in ip:port format".into());
        }
        if self.relay.subscriber_queue == 0 {
            return Err("Relay subscriber_queue must be non-zero".into());
        }

        if self.actuators.tick_ms == 0 {
            return Err("Actuator tick_ms must be non-zero".into());
        }

        let mut ids = HashSet::new();
        for channel in &self.actuators.channels {
            if !ids.insert(channel.id) {
                return Err(format!("Actuator channel {} is configured twice", channel.id).into());
            }
            if !(channel.min < channel.max) {
                return Err(format!("Actuator channel {}: min must be below max", channel.id).into());
            }
            if channel.default < channel.min || channel.default > channel.max {
                return Err(format!("Actuator channel {}: default lies outside bounds", channel.id).into());
            }
        }

        for binding in &self.controls.bindings {
            if binding.moves.is_empty() {
                return Err(format!("Key binding {:?} has no moves", binding.key).into());
            }
            for axis in &binding.moves {
                if !ids.contains(&axis.channel) {
                    return Err(format!(
                        "Key binding {:?} references unknown channel {}",
                        binding.key, axis.channel
                    )
                    .into());
                }
                if axis.direction != 1 && axis.direction != -1 {
                    return Err(format!("Key binding {:?}: direction must be 1 or -1", binding.key).into());
                }
                if !(axis.speed > 0.0) || !axis.speed.is_finite() {
                    return Err(format!("Key binding {:?}: speed must be positive", binding.key).into());
                }
            }
        }

        Ok(())
    }
}

fn default_endpoint() -> String { "ws://127.0.0.1:8000/ws".to_string() }
fn default_room() -> String { "robot".to_string() }
fn default_reconnect_delay_ms() -> u64 { 1000 }
fn default_video_listen() -> String { "127.0.0.1:5004".to_string() }
fn default_audio_listen() -> String { "127.0.0.1:5006".to_string() }
fn default_true() -> bool { true }
fn default_http_host() -> String { "0.0.0.0".to_string() }
fn default_http_port() -> u16 { 8080 }
fn default_log_level() -> String { "info".to_string() }
fn default_video_payload_type() -> u8 { 109 }
fn default_audio_payload_type() -> u8 { 111 }
fn default_subscriber_queue() -> usize { 256 }
fn default_write_retry_ms() -> u64 { 50 }
fn default_tick_ms() -> u64 { 50 }

fn default_ice_servers() -> Vec<IceServerConfig> {
    vec![IceServerConfig {
        urls: vec!["stun:stun.l.google.com:19302".to_string()],
        username: None,
        credential: None,
    }]
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![
        // Drive motors
        ChannelConfig { id: 0, min: 0.0, max: 180.0, default: 90.0 },
        ChannelConfig { id: 1, min: 0.0, max: 180.0, default: 90.0 },
        // Camera pan / tilt
        ChannelConfig { id: 2, min: 0.0, max: 180.0, default: 90.0 },
        ChannelConfig { id: 3, min: 30.0, max: 150.0, default: 90.0 },
    ]
}

fn default_bindings() -> Vec<KeyBindingConfig> {
    fn axis(channel: u32, direction: i32, speed: f64) -> AxisMoveConfig {
        AxisMoveConfig { channel, direction, speed }
    }
    fn bind(key: &str, moves: Vec<AxisMoveConfig>) -> KeyBindingConfig {
        KeyBindingConfig { key: key.to_string(), moves }
    }

    vec![
        bind("w", vec![axis(0, 1, 90.0), axis(1, 1, 90.0)]),
        bind("s", vec![axis(0, -1, 90.0), axis(1, -1, 90.0)]),
        bind("a", vec![axis(0, -1, 60.0), axis(1, 1, 60.0)]),
        bind("d", vec![axis(0, 1, 60.0), axis(1, -1, 60.0)]),
        bind("ArrowLeft", vec![axis(2, -1, 60.0)]),
        bind("ArrowRight", vec![axis(2, 1, 60.0)]),
        bind("ArrowUp", vec![axis(3, 1, 45.0)]),
        bind("ArrowDown", vec![axis(3, -1, 45.0)]),
    ]
}
