//! HTTP server for health checks and the actuator API
//!
//! `POST /api/move` and `POST /api/stop` mirror the actuator service calls and
//! answer with its `{ok, err}` result; `GET /api/angles` reports positions.

use crate::actuator::{ActuatorControl, AngleReading, ChannelId, CommandResult};
use crate::webrtc::SessionManager;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use log::info;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

/// State shared by all handlers
#[derive(Clone)]
pub struct ApiState {
    pub actuators: Arc<dyn ActuatorControl>,
    pub sessions: Arc<SessionManager>,
    pub started: Instant,
}

impl ApiState {
    pub fn new(actuators: Arc<dyn ActuatorControl>, sessions: Arc<SessionManager>) -> Self {
        Self {
            actuators,
            sessions,
            started: Instant::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub channel: ChannelId,
    pub direction: i32,
    pub speed: f64,
}

#[derive(Debug, Deserialize)]
pub struct StopRequest {
    pub channel: ChannelId,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/move", post(move_handler))
        .route("/api/stop", post(stop_handler))
        .route("/api/angles", get(angles_handler))
        .with_state(state)
}

/// Serve the API until the listener fails
pub async fn run_http_server(host: &str, port: u16, state: ApiState) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, router(state))
        .await
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;

    Ok(())
}

/// Health check handler
async fn health_handler(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.started.elapsed().as_secs_f64(),
        "peer_id": state.sessions.self_id(),
        "room": state.sessions.room(),
        "peers": state.sessions.peer_count().await,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn move_handler(State(state): State<ApiState>, Json(req): Json<MoveRequest>) -> Json<CommandResult> {
    Json(state.actuators.move_channel(req.channel, req.direction, req.speed).await)
}

async fn stop_handler(State(state): State<ApiState>, Json(req): Json<StopRequest>) -> Json<CommandResult> {
    Json(state.actuators.stop_channel(req.channel).await)
}

async fn angles_handler(State(state): State<ApiState>) -> Json<Vec<AngleReading>> {
    Json(state.actuators.get_angles().await)
}
