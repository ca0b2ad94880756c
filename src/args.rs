use clap::Parser;
use std::path::PathBuf;

use crate::config;

#[derive(Parser, Debug)]
#[command(name = "teleop-core")]
#[command(version)]
#[command(about = "WebRTC teleoperation node: camera relay and actuator control", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/teleop-core.toml")]
    pub config: PathBuf,

    /// Signaling server WebSocket URL
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Room to join
    #[arg(short, long)]
    pub room: Option<String>,

    /// Participant ID (generated when empty)
    #[arg(long)]
    pub peer_id: Option<String>,

    /// HTTP port for health/API
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Disable the HTTP API
    #[arg(long, action)]
    pub no_http: bool,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }

    /// Apply command line overrides on top of the file configuration
    pub fn apply(&self, config: &mut config::Config) {
        if let Some(ref endpoint) = self.endpoint {
            config.signaling.endpoint = endpoint.clone();
        }
        if let Some(ref room) = self.room {
            config.signaling.room = room.clone();
        }
        if let Some(ref peer_id) = self.peer_id {
            config.signaling.peer_id = peer_id.clone();
        }
        if let Some(port) = self.http_port {
            config.http.port = port;
        }
        if self.no_http {
            config.http.enabled = false;
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
    }
}
