//! Signaling server client
//!
//! Keeps one WebSocket connection to the room's signaling server, announces
//! this participant with `join`, routes inbound messages addressed to us into
//! the [`SessionManager`] and forwards outbound session messages. The
//! connection is re-established after a fixed delay whenever it drops.

use crate::config::SignalingConfig;
use crate::webrtc::{SessionEvent, SessionManager, SignalMessage, SignalPayload, WebRTCError};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;

pub struct SignalingClient {
    endpoint: String,
    reconnect_delay: Duration,
    sessions: Arc<SessionManager>,
    outbound_rx: Mutex<mpsc::UnboundedReceiver<SignalMessage>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
}

impl SignalingClient {
    pub fn new(
        config: &SignalingConfig,
        sessions: Arc<SessionManager>,
        outbound_rx: mpsc::UnboundedReceiver<SignalMessage>,
        events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            sessions,
            outbound_rx: Mutex::new(outbound_rx),
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Whether an inbound message is meant for this participant
    fn accepts(&self, message: &SignalMessage) -> bool {
        match message.payload {
            // Our own announcement echoed back by the server
            SignalPayload::Join => message.from != self.sessions.self_id(),
            _ => message.to == self.sessions.self_id(),
        }
    }

    /// Route a validated message to its session
    pub async fn dispatch(&self, message: SignalMessage) {
        if !self.accepts(&message) {
            debug!("Ignoring {} from {} addressed to {:?}", message.kind(), message.from, message.to);
            return;
        }
        self.sessions.handle_signal(message).await;
    }

    /// Parse a text frame; malformed messages are logged and dropped
    pub async fn handle_text(&self, text: &str) {
        match SignalMessage::from_json(text) {
            Ok(message) => self.dispatch(message).await,
            Err(e) => warn!("Dropping signaling message: {}", e),
        }
    }

    /// Run one connection until it closes or fails
    pub async fn connect(&self) -> Result<(), WebRTCError> {
        let (ws_stream, _) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| WebRTCError::Transport(format!("Failed to connect to {}: {}", self.endpoint, e)))?;
        info!("Connected to signaling server {}", self.endpoint);

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let mut outbound = self.outbound_rx.lock().await;

        // Anything queued while disconnected belongs to sessions the peers have given up on
        let mut stale = 0usize;
        while outbound.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("Discarded {} signaling messages queued while offline", stale);
        }

        let join = SignalMessage::join(self.sessions.self_id(), self.sessions.room()).to_json()?;
        ws_sender
            .send(Message::Text(join))
            .await
            .map_err(|e| WebRTCError::Transport(format!("Failed to send join: {}", e)))?;
        info!("Joined room {} as {}", self.sessions.room(), self.sessions.self_id());

        loop {
            tokio::select! {
                incoming = ws_receiver.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text).await,
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => self.handle_text(text).await,
                        Err(_) => warn!("Dropping non-UTF-8 binary signaling frame"),
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        ws_sender
                            .send(Message::Pong(payload))
                            .await
                            .map_err(|e| WebRTCError::Transport(e.to_string()))?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Err(WebRTCError::Transport(format!("Server closed connection: {:?}", frame)));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(WebRTCError::Transport(e.to_string())),
                    None => return Err(WebRTCError::Transport("Connection closed".to_string())),
                },
                message = outbound.recv() => {
                    let Some(message) = message else {
                        return Ok(());
                    };
                    let json = message.to_json()?;
                    debug!("Sending {} to {}", message.kind(), message.to);
                    ws_sender
                        .send(Message::Text(json))
                        .await
                        .map_err(|e| WebRTCError::Transport(e.to_string()))?;
                }
            }
        }
    }

    /// Connect forever, reconnecting after `reconnect_delay`
    pub async fn run(self: Arc<Self>) {
        if let Some(events_rx) = self.events_rx.lock().await.take() {
            tokio::spawn(self.sessions.clone().run_events(events_rx));
        }

        loop {
            match self.connect().await {
                Ok(()) => {
                    info!("Signaling outbound queue closed, stopping client");
                    return;
                }
                Err(e) => warn!("Signaling connection lost: {}", e),
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }
}
