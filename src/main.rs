//! teleop-core - Main entry point
//!
//! Joins a signaling room, relays local camera RTP to every browser peer and
//! turns control data channel key commands into actuator movement.

use clap::Parser;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use teleop_core::actuator::{ActuatorControl, ActuatorRegistry, LoggingDriver};
use teleop_core::args::Args;
use teleop_core::config::Config;
use teleop_core::control::CommandRouter;
use teleop_core::relay::{MediaRelay, RtpSink};
use teleop_core::transport::SignalingClient;
use teleop_core::web::{run_http_server, ApiState};
use teleop_core::webrtc::{OutboundTracks, PeerConnectionManager, RtcSessionFactory, SessionFactory, SessionManager};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let (mut config, load_error) = match args.load_config() {
        Ok(cfg) => (cfg, None),
        Err(e) => (Config::default(), Some(e)),
    };
    args.apply(&mut config);

    // Initialize logging with noise filtering for third-party WebRTC crates
    env_logger::Builder::new()
        .parse_filters(&std::env::var("TELEOP_LOG").unwrap_or_else(|_| config.logging.level.clone()))
        .filter_module("webrtc_ice", log::LevelFilter::Error)
        .filter_module("webrtc_dtls", log::LevelFilter::Error)
        .filter_module("webrtc_mdns", log::LevelFilter::Error)
        .init();

    info!("teleop-core v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        Some(e) => warn!("Failed to load config {:?}: {}, using defaults", args.config, e),
        None => info!("Loaded configuration from {:?}", args.config),
    }

    if config.signaling.peer_id.is_empty() {
        config.signaling.peer_id = format!("robot-{}", uuid::Uuid::new_v4());
    }
    config.validate()?;
    info!(
        "Participant {} in room {} via {}",
        config.signaling.peer_id, config.signaling.room, config.signaling.endpoint
    );

    // Actuators and key command routing
    let registry = ActuatorRegistry::new(&config.actuators, Box::new(LoggingDriver));
    let actuators: Arc<dyn ActuatorControl> = Arc::new(registry.clone());
    let router = Arc::new(CommandRouter::new(&config.controls, actuators.clone()));

    // Shared outbound tracks fed by the relays
    let tracks = OutboundTracks::new(&config.webrtc);
    let retry = Duration::from_millis(config.relay.write_retry_ms);
    let video_relay = Arc::new(MediaRelay::new("video", config.relay.subscriber_queue, retry));
    let audio_relay = Arc::new(MediaRelay::new("audio", config.relay.subscriber_queue, retry));

    let pumps: Vec<JoinHandle<()>> = vec![
        spawn_pump(
            video_relay.clone(),
            config.relay.video_listen.clone(),
            tracks.video.clone(),
            config.webrtc.video_payload_type,
        ),
        spawn_pump(
            audio_relay.clone(),
            config.relay.audio_listen.clone(),
            tracks.audio.clone(),
            config.webrtc.audio_payload_type,
        ),
    ];

    // Sessions and signaling
    let manager = PeerConnectionManager::new(config.webrtc.clone())?;
    let factory: Arc<dyn SessionFactory> = Arc::new(RtcSessionFactory::new(manager, tracks, router));
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (sessions, events_rx) =
        SessionManager::new(&config.signaling.peer_id, &config.signaling.room, factory, outbound_tx);
    let sessions = Arc::new(sessions);

    let client = Arc::new(SignalingClient::new(&config.signaling, sessions.clone(), outbound_rx, events_rx));
    let mut signaling_handle = task::spawn(client.run());

    let mut http_handle = if config.http.enabled {
        let state = ApiState::new(actuators, sessions.clone());
        let host = config.http.host.clone();
        let port = config.http.port;
        Some(task::spawn(async move {
            if let Err(e) = run_http_server(&host, port, state).await {
                error!("HTTP server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Wait for shutdown signal
    let shutdown = async {
        let _ = signal::ctrl_c().await;
        info!("Shutdown signal received");
    };

    match http_handle.as_mut() {
        Some(http) => {
            tokio::select! {
                _ = shutdown => info!("Initiating graceful shutdown..."),
                result = &mut signaling_handle => log_task_result("Signaling client", result),
                result = http => log_task_result("HTTP server", result),
            }
        }
        None => {
            tokio::select! {
                _ = shutdown => info!("Initiating graceful shutdown..."),
                result = &mut signaling_handle => log_task_result("Signaling client", result),
            }
        }
    }

    info!("Stopping all tasks...");

    // No further movement once shutdown starts
    registry.shutdown().await;

    for handle in pumps {
        handle.abort();
        let _ = handle.await;
    }

    if !signaling_handle.is_finished() {
        signaling_handle.abort();
        let _ = signaling_handle.await;
    }

    if let Some(handle) = http_handle {
        if !handle.is_finished() {
            handle.abort();
            let _ = handle.await;
        }
    }

    sessions.close_all().await;
    info!("teleop-core stopped");

    Ok(())
}

fn spawn_pump(relay: Arc<MediaRelay>, listen: String, sink: Arc<dyn RtpSink>, payload_type: u8) -> JoinHandle<()> {
    task::spawn(async move {
        if let Err(e) = relay.pump(&listen, sink, payload_type).await {
            error!("{} relay on {} stopped: {}", relay.name(), listen, e);
        }
    })
}

fn log_task_result(task: &str, result: Result<(), tokio::task::JoinError>) {
    match result {
        Ok(()) => warn!("{} stopped unexpectedly", task),
        Err(err) => error!("{} join error: {}", task, err),
    }
}
