//! RTP media relay
//!
//! Bridges RTP packets from a local encoder into the outbound WebRTC tracks:
//! - one UDP pump per media kind, rewriting the payload type to the
//!   negotiated value before writing to the track
//! - fan-out of every relayed packet to dynamically registered subscribers,
//!   dropping per subscriber when its queue is full

use crate::webrtc::WebRTCError;
use async_trait::async_trait;
use log::{debug, info, trace};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use webrtc::rtp::packet::Packet;
use webrtc::util::Unmarshal;

/// Largest datagram accepted from the encoder
const MAX_DATAGRAM: usize = 1500;

/// Destination of relayed packets (an outbound track)
#[async_trait]
pub trait RtpSink: Send + Sync {
    async fn write_rtp(&self, packet: &Packet) -> Result<(), WebRTCError>;
}

/// Parse a datagram as RTP and force its payload type
pub fn rewrite_payload_type(datagram: &[u8], payload_type: u8) -> Result<Packet, WebRTCError> {
    let mut buf = datagram;
    let mut packet = Packet::unmarshal(&mut buf)
        .map_err(|e| WebRTCError::Media(format!("Invalid RTP packet: {}", e)))?;
    packet.header.payload_type = payload_type;
    Ok(packet)
}

/// Receiving end of a relay subscription
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<Packet>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next relayed packet; `None` once unsubscribed
    pub async fn recv(&mut self) -> Option<Packet> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Packet> {
        self.receiver.try_recv().ok()
    }
}

/// Relay for one media kind
pub struct MediaRelay {
    name: String,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<Packet>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    retry_delay: Duration,
}

impl MediaRelay {
    pub fn new(name: &str, queue_capacity: usize, retry_delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
            retry_delay,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a new subscriber with a bounded queue
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        self.subscribers.lock().insert(id, sender);
        debug!("{} relay: subscriber {} added", self.name, id);
        Subscription { id, receiver }
    }

    /// Remove a subscriber, closing its queue
    pub fn unsubscribe(&self, id: u64) -> bool {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            debug!("{} relay: subscriber {} removed", self.name, id);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver a copy of the packet to every subscriber without blocking.
    ///
    /// Returns the number of subscribers that accepted it.
    pub fn broadcast(&self, packet: &Packet) -> usize {
        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0;
        let mut gone = Vec::new();

        for (id, sender) in subscribers.iter() {
            match sender.try_send(packet.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!("{} relay: subscriber {} full, dropping packet", self.name, id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*id),
            }
        }

        for id in gone {
            subscribers.remove(&id);
            debug!("{} relay: subscriber {} went away", self.name, id);
        }
        delivered
    }

    /// Bind the listen address and pump packets into `sink` until the socket fails
    pub async fn pump(&self, listen: &str, sink: Arc<dyn RtpSink>, payload_type: u8) -> Result<(), WebRTCError> {
        let socket = UdpSocket::bind(listen)
            .await
            .map_err(|e| WebRTCError::Transport(format!("Failed to bind {} relay on {}: {}", self.name, listen, e)))?;
        info!("{} relay listening on udp://{} (payload type {})", self.name, listen, payload_type);
        self.pump_socket(socket, sink, payload_type).await
    }

    /// Pump packets from an already bound socket.
    ///
    /// A failed track write is retried until it succeeds; a socket read
    /// failure ends the pump.
    pub async fn pump_socket(
        &self,
        socket: UdpSocket,
        sink: Arc<dyn RtpSink>,
        payload_type: u8,
    ) -> Result<(), WebRTCError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut relayed: u64 = 0;

        loop {
            let (len, _) = socket
                .recv_from(&mut buf)
                .await
                .map_err(|e| WebRTCError::Transport(format!("{} relay read failed: {}", self.name, e)))?;

            let packet = match rewrite_payload_type(&buf[..len], payload_type) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!("{} relay: {}", self.name, e);
                    continue;
                }
            };

            self.broadcast(&packet);

            while let Err(e) = sink.write_rtp(&packet).await {
                trace!("{} relay write failed, retrying: {}", self.name, e);
                tokio::time::sleep(self.retry_delay).await;
            }

            relayed += 1;
            if relayed == 1 {
                info!("{} relay forwarded first RTP packet ({} bytes)", self.name, len);
            }
        }
    }
}
