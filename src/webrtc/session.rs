//! Peer session management
//!
//! One [`PeerSession`] per remote peer, negotiated with the perfect
//! negotiation pattern:
//! - either side may offer at any time
//! - on glare the impolite peer ignores the incoming offer, the polite peer
//!   rolls back its own and answers
//! - remote ICE candidates received before a remote description are queued
//!   and applied in arrival order once one is applied
//!
//! Session callbacks (negotiation needed, local candidates, ICE state) are
//! delivered as [`SessionEvent`]s and handled by the [`SessionManager`].

use super::signaling::{CandidateInit, PeerId, SignalMessage, SignalPayload};
use super::WebRTCError;
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};

/// Signaling state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

/// Kind of a remote session description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// The media-session handle a [`PeerSession`] negotiates
#[async_trait]
pub trait MediaSession: Send + Sync {
    fn signaling_state(&self) -> SignalingState;

    async fn has_remote_description(&self) -> bool;

    /// Create an offer and apply it as the local description
    async fn create_offer(&self, ice_restart: bool) -> Result<String, WebRTCError>;

    /// Create an answer and apply it as the local description
    async fn create_answer(&self) -> Result<String, WebRTCError>;

    async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<(), WebRTCError>;

    /// Discard an unfinished local offer
    async fn rollback(&self) -> Result<(), WebRTCError>;

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<(), WebRTCError>;

    async fn close(&self) -> Result<(), WebRTCError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEventKind {
    NegotiationNeeded,
    LocalCandidate(CandidateInit),
    IceDisconnected,
    Failed,
}

/// Callback raised by a media session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub peer_id: PeerId,
    pub session_id: u64,
    pub kind: SessionEventKind,
}

/// Event sink handed to a media session when it is created
#[derive(Clone)]
pub struct SessionEvents {
    peer_id: PeerId,
    session_id: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionEvents {
    pub fn new(peer_id: &str, session_id: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            session_id,
            tx,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn emit(&self, kind: SessionEventKind) {
        let _ = self.tx.send(SessionEvent {
            peer_id: self.peer_id.clone(),
            session_id: self.session_id,
            kind,
        });
    }

    pub fn negotiation_needed(&self) {
        self.emit(SessionEventKind::NegotiationNeeded);
    }

    pub fn local_candidate(&self, candidate: CandidateInit) {
        self.emit(SessionEventKind::LocalCandidate(candidate));
    }

    pub fn ice_disconnected(&self) {
        self.emit(SessionEventKind::IceDisconnected);
    }

    pub fn failed(&self) {
        self.emit(SessionEventKind::Failed);
    }
}

/// Creates media sessions for new peers
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, events: SessionEvents) -> Result<Arc<dyn MediaSession>, WebRTCError>;
}

/// Negotiation state for one remote peer
pub struct PeerSession {
    id: u64,
    self_id: PeerId,
    peer_id: PeerId,
    room: String,
    polite: bool,
    media: Arc<dyn MediaSession>,
    making_offer: AtomicBool,
    queued_candidates: Mutex<Vec<CandidateInit>>,
    closed: AtomicBool,
    outbound: mpsc::UnboundedSender<SignalMessage>,
    /// Held across each description change so offers, answers and rollbacks never interleave
    negotiation: AsyncMutex<()>,
}

impl PeerSession {
    pub fn new(
        id: u64,
        self_id: &str,
        peer_id: &str,
        room: &str,
        media: Arc<dyn MediaSession>,
        outbound: mpsc::UnboundedSender<SignalMessage>,
    ) -> Self {
        Self {
            id,
            self_id: self_id.to_string(),
            peer_id: peer_id.to_string(),
            room: room.to_string(),
            polite: self_id < peer_id,
            media,
            making_offer: AtomicBool::new(false),
            queued_candidates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            outbound,
            negotiation: AsyncMutex::new(()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn is_polite(&self) -> bool {
        self.polite
    }

    pub fn is_making_offer(&self) -> bool {
        self.making_offer.load(Ordering::SeqCst)
    }

    pub fn signaling_state(&self) -> SignalingState {
        if self.closed.load(Ordering::SeqCst) {
            return SignalingState::Closed;
        }
        self.media.signaling_state()
    }

    /// Candidates waiting for a remote description, in arrival order
    pub fn queued_candidates(&self) -> Vec<CandidateInit> {
        self.queued_candidates.lock().clone()
    }

    fn send(&self, payload: SignalPayload) {
        let message = SignalMessage::new(&self.self_id, &self.peer_id, &self.room, payload);
        if self.outbound.send(message).is_err() {
            warn!("Peer {}: signaling channel closed, dropping outbound message", self.peer_id);
        }
    }

    fn ensure_open(&self) -> Result<(), WebRTCError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WebRTCError::Closed);
        }
        Ok(())
    }

    /// Renegotiation trigger: create, apply and send an offer unless a
    /// negotiation is already under way
    pub async fn negotiate(&self) -> Result<(), WebRTCError> {
        self.ensure_open()?;
        let _negotiation = self.negotiation.lock().await;
        self.ensure_open()?;

        let state = self.media.signaling_state();
        if state != SignalingState::Stable {
            debug!("Peer {}: skipping offer in {:?}", self.peer_id, state);
            return Ok(());
        }
        self.making_offer.store(true, Ordering::SeqCst);

        let result = self.media.create_offer(false).await;
        if let Ok(sdp) = &result {
            self.send(SignalPayload::Offer { sdp: sdp.clone() });
            debug!("Peer {}: sent offer", self.peer_id);
        }
        self.making_offer.store(false, Ordering::SeqCst);
        result.map(|_| ())
    }

    /// Restart ICE after a connectivity failure
    pub async fn restart_ice(&self) -> Result<(), WebRTCError> {
        self.ensure_open()?;
        let _negotiation = self.negotiation.lock().await;
        self.ensure_open()?;
        self.making_offer.store(true, Ordering::SeqCst);

        let result = self.media.create_offer(true).await;
        if let Ok(sdp) = &result {
            self.send(SignalPayload::Offer { sdp: sdp.clone() });
            info!("Peer {}: sent ICE restart offer", self.peer_id);
        }
        self.making_offer.store(false, Ordering::SeqCst);
        result.map(|_| ())
    }

    /// Handle a remote offer, resolving glare by politeness
    pub async fn handle_offer(&self, sdp: &str) -> Result<(), WebRTCError> {
        self.ensure_open()?;
        let _negotiation = self.negotiation.lock().await;
        self.ensure_open()?;

        let state = self.media.signaling_state();
        let collision = self.is_making_offer() || state != SignalingState::Stable;
        if collision && !self.polite {
            info!("Peer {}: ignoring colliding offer (impolite)", self.peer_id);
            return Ok(());
        }
        if collision && state == SignalingState::HaveLocalOffer {
            debug!("Peer {}: rolling back local offer", self.peer_id);
            self.media.rollback().await?;
        }

        self.media.set_remote_description(SdpKind::Offer, sdp).await?;
        self.flush_candidates().await;

        let answer = self.media.create_answer().await?;
        self.making_offer.store(false, Ordering::SeqCst);
        self.send(SignalPayload::Answer { sdp: answer });
        debug!("Peer {}: sent answer", self.peer_id);
        Ok(())
    }

    /// Handle a remote answer to our offer
    pub async fn handle_answer(&self, sdp: &str) -> Result<(), WebRTCError> {
        self.ensure_open()?;
        let _negotiation = self.negotiation.lock().await;
        self.ensure_open()?;
        self.media.set_remote_description(SdpKind::Answer, sdp).await?;
        self.flush_candidates().await;
        Ok(())
    }

    /// Apply a remote candidate, or queue it until a remote description exists
    pub async fn handle_candidate(&self, candidate: CandidateInit) -> Result<(), WebRTCError> {
        self.ensure_open()?;
        if !self.media.has_remote_description().await {
            self.queued_candidates.lock().push(candidate);
            debug!("Peer {}: queued remote candidate", self.peer_id);
            return Ok(());
        }
        self.media.add_ice_candidate(candidate).await
    }

    /// Send a locally gathered candidate to the peer
    pub fn send_candidate(&self, candidate: CandidateInit) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.send(SignalPayload::Candidate(candidate));
    }

    async fn flush_candidates(&self) {
        let queued = std::mem::take(&mut *self.queued_candidates.lock());
        if queued.is_empty() {
            return;
        }
        debug!("Peer {}: applying {} queued candidates", self.peer_id, queued.len());
        for candidate in queued {
            if let Err(e) = self.media.add_ice_candidate(candidate).await {
                warn!("Peer {}: {}", self.peer_id, e);
            }
        }
    }

    /// Close the media session and drop all negotiation state
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queued_candidates.lock().clear();
        self.making_offer.store(false, Ordering::SeqCst);
        if let Err(e) = self.media.close().await {
            warn!("Peer {}: {}", self.peer_id, e);
        }
        info!("Session with peer {} closed", self.peer_id);
    }
}

/// Owns every live [`PeerSession`], keyed by peer ID
pub struct SessionManager {
    self_id: PeerId,
    room: String,
    sessions: RwLock<HashMap<PeerId, Arc<PeerSession>>>,
    factory: Arc<dyn SessionFactory>,
    outbound: mpsc::UnboundedSender<SignalMessage>,
    events: mpsc::UnboundedSender<SessionEvent>,
    next_session_id: AtomicU64,
}

impl SessionManager {
    /// Create a manager; session events arrive on the returned receiver
    pub fn new(
        self_id: &str,
        room: &str,
        factory: Arc<dyn SessionFactory>,
        outbound: mpsc::UnboundedSender<SignalMessage>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            self_id: self_id.to_string(),
            room: room.to_string(),
            sessions: RwLock::new(HashMap::new()),
            factory,
            outbound,
            events,
            next_session_id: AtomicU64::new(1),
        };
        (manager, events_rx)
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub async fn get(&self, peer_id: &str) -> Option<Arc<PeerSession>> {
        self.sessions.read().await.get(peer_id).cloned()
    }

    pub async fn peer_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn create_session(&self, peer_id: &str) -> Result<Arc<PeerSession>, WebRTCError> {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let events = SessionEvents::new(peer_id, id, self.events.clone());
        let media = self.factory.create(events).await?;
        let session = PeerSession::new(id, &self.self_id, peer_id, &self.room, media, self.outbound.clone());
        info!(
            "Created session {} for peer {} ({})",
            id,
            peer_id,
            if session.is_polite() { "polite" } else { "impolite" }
        );
        Ok(Arc::new(session))
    }

    async fn get_or_create(&self, peer_id: &str) -> Result<Arc<PeerSession>, WebRTCError> {
        if let Some(session) = self.get(peer_id).await {
            return Ok(session);
        }
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(peer_id) {
            return Ok(session.clone());
        }
        let session = self.create_session(peer_id).await?;
        sessions.insert(peer_id.to_string(), session.clone());
        Ok(session)
    }

    /// Start a fresh session for a peer, closing any previous one
    async fn replace(&self, peer_id: &str) -> Result<Arc<PeerSession>, WebRTCError> {
        let (created, previous) = {
            let mut sessions = self.sessions.write().await;
            let previous = sessions.remove(peer_id);
            let created = self.create_session(peer_id).await;
            if let Ok(session) = &created {
                sessions.insert(peer_id.to_string(), session.clone());
            }
            (created, previous)
        };
        if let Some(previous) = previous {
            info!("Peer {} rejoined, replacing session {}", peer_id, previous.id());
            previous.close().await;
        }
        created
    }

    /// Remove and close a peer's session
    pub async fn remove(&self, peer_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(peer_id);
        match removed {
            Some(session) => {
                session.close().await;
                true
            }
            None => false,
        }
    }

    /// Route an accepted signaling message to the sender's session
    pub async fn handle_signal(&self, message: SignalMessage) {
        let peer_id = message.from.as_str();
        let kind = message.kind();

        let result = match message.payload {
            SignalPayload::Join => self.replace(peer_id).await.map(|_| ()),
            SignalPayload::Leave => {
                if !self.remove(peer_id).await {
                    debug!("Leave from unknown peer {}", peer_id);
                }
                Ok(())
            }
            SignalPayload::Offer { sdp } => match self.get_or_create(peer_id).await {
                Ok(session) => session.handle_offer(&sdp).await,
                Err(e) => Err(e),
            },
            SignalPayload::Answer { sdp } => match self.get(peer_id).await {
                Some(session) => session.handle_answer(&sdp).await,
                None => {
                    debug!("Answer from unknown peer {}", peer_id);
                    Ok(())
                }
            },
            SignalPayload::Candidate(candidate) => match self.get_or_create(peer_id).await {
                Ok(session) => session.handle_candidate(candidate).await,
                Err(e) => Err(e),
            },
        };

        if let Err(e) = result {
            warn!("Peer {}: {} handling failed: {}", peer_id, kind, e);
        }
    }

    /// Handle a callback raised by a media session
    pub async fn handle_event(&self, event: SessionEvent) {
        let session = match self.get(&event.peer_id).await {
            Some(session) if session.id() == event.session_id => session,
            _ => {
                debug!("Dropping {:?} from stale session {} of {}", event.kind, event.session_id, event.peer_id);
                return;
            }
        };

        let result = match event.kind {
            SessionEventKind::NegotiationNeeded => session.negotiate().await,
            SessionEventKind::LocalCandidate(candidate) => {
                session.send_candidate(candidate);
                Ok(())
            }
            SessionEventKind::IceDisconnected => {
                info!("Peer {}: ICE disconnected, restarting", event.peer_id);
                session.restart_ice().await
            }
            SessionEventKind::Failed => {
                warn!("Peer {}: session failed, removing", event.peer_id);
                let mut sessions = self.sessions.write().await;
                if sessions.get(&event.peer_id).map(|s| s.id()) == Some(event.session_id) {
                    sessions.remove(&event.peer_id);
                }
                drop(sessions);
                session.close().await;
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Peer {}: {}", event.peer_id, e);
        }
    }

    /// Handle session events, each on its own task
    pub async fn run_events(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            let manager = self.clone();
            tokio::spawn(async move {
                manager.handle_event(event).await;
            });
        }
    }

    /// Close every session
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<PeerSession>> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::testing::{FakeCall, FakeFactory, FakeMediaSession};

    fn candidate(n: u32) -> CandidateInit {
        CandidateInit {
            candidate: format!("candidate:{} 1 udp 2122260223 10.0.0.{} 5000 typ host", n, n),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }

    fn signal(from: &str, payload: SignalPayload) -> SignalMessage {
        SignalMessage::new(from, "robot", "lab", payload)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SignalMessage>) -> Vec<SignalMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    fn manager(
        factory: Arc<FakeFactory>,
    ) -> (
        SessionManager,
        mpsc::UnboundedReceiver<SignalMessage>,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (manager, events_rx) = SessionManager::new("robot", "lab", factory, outbound);
        (manager, outbound_rx, events_rx)
    }

    fn session(self_id: &str, peer_id: &str) -> (PeerSession, Arc<FakeMediaSession>, mpsc::UnboundedReceiver<SignalMessage>) {
        let media = Arc::new(FakeMediaSession::default());
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let session = PeerSession::new(1, self_id, peer_id, "lab", media.clone(), outbound);
        (session, media, outbound_rx)
    }

    #[tokio::test]
    async fn test_join_creates_one_session_and_one_offer() {
        let factory = Arc::new(FakeFactory::negotiating());
        let (manager, mut outbound, mut events) = manager(factory.clone());

        manager.handle_signal(signal("p2", SignalPayload::Join)).await;
        while let Ok(event) = events.try_recv() {
            manager.handle_event(event).await;
        }

        assert_eq!(manager.peer_count().await, 1);
        assert_eq!(factory.created().len(), 1);
        let sent = drain(&mut outbound);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "p2");
        assert_eq!(sent[0].from, "robot");
        assert!(matches!(sent[0].payload, SignalPayload::Offer { .. }));
    }

    #[tokio::test]
    async fn test_early_candidates_flush_in_order_on_offer() {
        let factory = Arc::new(FakeFactory::default());
        let (manager, mut outbound, _events) = manager(factory.clone());

        manager.handle_signal(signal("p3", SignalPayload::Candidate(candidate(1)))).await;
        manager.handle_signal(signal("p3", SignalPayload::Candidate(candidate(2)))).await;
        manager.handle_signal(signal("p3", SignalPayload::Candidate(candidate(3)))).await;

        let session = manager.get("p3").await.unwrap();
        assert_eq!(session.queued_candidates(), vec![candidate(1), candidate(2), candidate(3)]);
        let media = factory.media_for("p3").unwrap();
        assert!(media.applied_candidates().is_empty());

        manager
            .handle_signal(signal("p3", SignalPayload::Offer { sdp: "v=0 remote".to_string() }))
            .await;

        assert_eq!(media.applied_candidates(), vec![candidate(1), candidate(2), candidate(3)]);
        assert!(session.queued_candidates().is_empty());
        assert_eq!(factory.created().len(), 1);

        // Later candidates are applied directly
        manager.handle_signal(signal("p3", SignalPayload::Candidate(candidate(4)))).await;
        assert_eq!(media.applied_candidates().len(), 4);
        assert!(session.queued_candidates().is_empty());

        let sent = drain(&mut outbound);
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].payload, SignalPayload::Answer { .. }));
        assert_eq!(sent[0].to, "p3");
    }

    #[tokio::test]
    async fn test_answer_flushes_queued_candidates() {
        let (session, media, _rx) = session("robot", "p4");
        session.negotiate().await.unwrap();
        session.handle_candidate(candidate(1)).await.unwrap();
        session.handle_candidate(candidate(2)).await.unwrap();
        assert_eq!(session.queued_candidates().len(), 2);

        session.handle_answer("v=0 answer").await.unwrap();
        assert_eq!(media.applied_candidates(), vec![candidate(1), candidate(2)]);
        assert!(session.queued_candidates().is_empty());
        assert_eq!(session.signaling_state(), SignalingState::Stable);
    }

    #[tokio::test]
    async fn test_polite_peer_rolls_back_on_glare() {
        // "a" < "b": a is polite towards b
        let (session, media, mut outbound) = session("a", "b");
        assert!(session.is_polite());

        session.negotiate().await.unwrap();
        assert_eq!(session.signaling_state(), SignalingState::HaveLocalOffer);

        session.handle_offer("v=0 from b").await.unwrap();
        assert_eq!(session.signaling_state(), SignalingState::Stable);
        assert!(media.calls().contains(&FakeCall::Rollback));

        let sent = drain(&mut outbound);
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0].payload, SignalPayload::Offer { .. }));
        assert!(matches!(sent[1].payload, SignalPayload::Answer { .. }));
    }

    #[tokio::test]
    async fn test_impolite_peer_ignores_colliding_offer() {
        let (session, media, mut outbound) = session("b", "a");
        assert!(!session.is_polite());

        session.negotiate().await.unwrap();
        session.handle_offer("v=0 from a").await.unwrap();

        assert_eq!(session.signaling_state(), SignalingState::HaveLocalOffer);
        assert!(!media.calls().iter().any(|call| matches!(call, FakeCall::SetRemote(_) | FakeCall::Rollback)));
        let sent = drain(&mut outbound);
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].payload, SignalPayload::Offer { .. }));
    }

    #[tokio::test]
    async fn test_impolite_ignores_offer_racing_its_own() {
        let (session, media, mut outbound) = session("b", "a");
        media.hold_offers();

        let negotiating = session.negotiate();
        let incoming = async {
            media.wait_offer_started().await;
            assert!(session.is_making_offer());
            let (result, ()) = tokio::join!(session.handle_offer("v=0 from a"), async {
                media.release_offers();
            });
            result.unwrap();
        };
        let (result, ()) = tokio::join!(negotiating, incoming);
        result.unwrap();

        assert!(!session.is_making_offer());
        assert_eq!(session.signaling_state(), SignalingState::HaveLocalOffer);
        assert!(!media.calls().iter().any(|call| matches!(call, FakeCall::SetRemote(_))));
        let sent = drain(&mut outbound);
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].payload, SignalPayload::Offer { .. }));
    }

    #[tokio::test]
    async fn test_polite_answers_offer_racing_its_own() {
        let (session, media, mut outbound) = session("a", "b");
        media.hold_offers();

        let negotiating = session.negotiate();
        let incoming = async {
            media.wait_offer_started().await;
            assert!(session.is_making_offer());
            // The local offer is applied while the remote one waits its turn
            let (result, ()) = tokio::join!(session.handle_offer("v=0 from b"), async {
                media.release_offers();
            });
            result.unwrap();
        };
        let (result, ()) = tokio::join!(negotiating, incoming);
        result.unwrap();

        let calls = media.calls();
        let rollback = calls.iter().position(|call| *call == FakeCall::Rollback).unwrap();
        let remote = calls.iter().position(|call| *call == FakeCall::SetRemote(SdpKind::Offer)).unwrap();
        assert!(rollback < remote);
        assert_eq!(session.signaling_state(), SignalingState::Stable);

        let sent = drain(&mut outbound);
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0].payload, SignalPayload::Offer { .. }));
        assert!(matches!(sent[1].payload, SignalPayload::Answer { .. }));
        assert_eq!(sent[1].to, "b");
    }

    #[tokio::test]
    async fn test_negotiate_skips_while_offer_outstanding() {
        let (session, media, mut outbound) = session("robot", "p13");
        session.negotiate().await.unwrap();
        session.negotiate().await.unwrap();

        let offers = media
            .calls()
            .iter()
            .filter(|call| matches!(call, FakeCall::CreateOffer { .. }))
            .count();
        assert_eq!(offers, 1);
        assert_eq!(drain(&mut outbound).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_remote_description_keeps_session_for_retry() {
        let factory = Arc::new(FakeFactory::default());
        let (manager, mut outbound, _events) = manager(factory.clone());

        manager.handle_signal(signal("p5", SignalPayload::Candidate(candidate(1)))).await;
        let media = factory.media_for("p5").unwrap();
        media.fail_next_remote();

        manager
            .handle_signal(signal("p5", SignalPayload::Offer { sdp: "v=0 bad".to_string() }))
            .await;
        let session = manager.get("p5").await.unwrap();
        assert_eq!(session.signaling_state(), SignalingState::Stable);
        assert_eq!(session.queued_candidates(), vec![candidate(1)]);
        assert!(drain(&mut outbound).is_empty());

        manager
            .handle_signal(signal("p5", SignalPayload::Offer { sdp: "v=0 good".to_string() }))
            .await;
        assert_eq!(media.applied_candidates(), vec![candidate(1)]);
        assert_eq!(drain(&mut outbound).len(), 1);
    }

    #[tokio::test]
    async fn test_leave_discards_state_and_rejoin_starts_fresh() {
        let factory = Arc::new(FakeFactory::default());
        let (manager, _outbound, _events) = manager(factory.clone());

        manager.handle_signal(signal("p6", SignalPayload::Join)).await;
        manager.handle_signal(signal("p6", SignalPayload::Candidate(candidate(1)))).await;
        let first = manager.get("p6").await.unwrap();
        assert_eq!(first.queued_candidates().len(), 1);

        manager.handle_signal(signal("p6", SignalPayload::Leave)).await;
        assert!(manager.get("p6").await.is_none());
        assert_eq!(first.signaling_state(), SignalingState::Closed);
        assert!(first.queued_candidates().is_empty());
        assert!(factory.media_for("p6").unwrap().calls().contains(&FakeCall::Close));

        manager.handle_signal(signal("p6", SignalPayload::Join)).await;
        let second = manager.get("p6").await.unwrap();
        assert_ne!(first.id(), second.id());
        assert!(second.queued_candidates().is_empty());
        assert_eq!(manager.peer_count().await, 1);
    }

    #[tokio::test]
    async fn test_repeated_join_replaces_session() {
        let factory = Arc::new(FakeFactory::default());
        let (manager, _outbound, _events) = manager(factory.clone());

        manager.handle_signal(signal("p7", SignalPayload::Join)).await;
        let first = manager.get("p7").await.unwrap();
        manager.handle_signal(signal("p7", SignalPayload::Join)).await;
        let second = manager.get("p7").await.unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(first.signaling_state(), SignalingState::Closed);
        assert_eq!(manager.peer_count().await, 1);
    }

    #[tokio::test]
    async fn test_events_from_stale_sessions_are_dropped() {
        let factory = Arc::new(FakeFactory::negotiating());
        let (manager, mut outbound, mut events) = manager(factory);

        manager.handle_signal(signal("p8", SignalPayload::Join)).await;
        let stale = events.try_recv().unwrap();
        manager.handle_signal(signal("p8", SignalPayload::Leave)).await;
        manager.handle_signal(signal("p8", SignalPayload::Join)).await;

        manager.handle_event(stale).await;
        assert!(drain(&mut outbound).is_empty());

        let fresh = events.try_recv().unwrap();
        manager.handle_event(fresh).await;
        assert_eq!(drain(&mut outbound).len(), 1);
    }

    #[tokio::test]
    async fn test_ice_disconnect_sends_restart_offer() {
        let factory = Arc::new(FakeFactory::default());
        let (manager, mut outbound, _events) = manager(factory.clone());

        manager.handle_signal(signal("p9", SignalPayload::Join)).await;
        let session = manager.get("p9").await.unwrap();
        manager
            .handle_event(SessionEvent {
                peer_id: "p9".to_string(),
                session_id: session.id(),
                kind: SessionEventKind::IceDisconnected,
            })
            .await;

        let media = factory.media_for("p9").unwrap();
        assert!(media.calls().contains(&FakeCall::CreateOffer { ice_restart: true }));
        assert!(!session.is_making_offer());
        let sent = drain(&mut outbound);
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].payload, SignalPayload::Offer { .. }));
    }

    #[tokio::test]
    async fn test_local_candidates_are_sent_to_the_peer() {
        let factory = Arc::new(FakeFactory::default());
        let (manager, mut outbound, _events) = manager(factory);

        manager.handle_signal(signal("p10", SignalPayload::Join)).await;
        let session = manager.get("p10").await.unwrap();
        manager
            .handle_event(SessionEvent {
                peer_id: "p10".to_string(),
                session_id: session.id(),
                kind: SessionEventKind::LocalCandidate(candidate(9)),
            })
            .await;

        let sent = drain(&mut outbound);
        assert_eq!(sent, vec![SignalMessage::new("robot", "p10", "lab", SignalPayload::Candidate(candidate(9)))]);
    }

    #[tokio::test]
    async fn test_failed_session_is_removed() {
        let factory = Arc::new(FakeFactory::default());
        let (manager, _outbound, _events) = manager(factory);

        manager.handle_signal(signal("p11", SignalPayload::Join)).await;
        let session = manager.get("p11").await.unwrap();
        manager
            .handle_event(SessionEvent {
                peer_id: "p11".to_string(),
                session_id: session.id(),
                kind: SessionEventKind::Failed,
            })
            .await;

        assert!(manager.get("p11").await.is_none());
        assert_eq!(session.signaling_state(), SignalingState::Closed);
    }

    #[tokio::test]
    async fn test_answer_from_unknown_peer_creates_nothing() {
        let factory = Arc::new(FakeFactory::default());
        let (manager, _outbound, _events) = manager(factory.clone());
        manager
            .handle_signal(signal("p12", SignalPayload::Answer { sdp: "v=0".to_string() }))
            .await;
        assert_eq!(manager.peer_count().await, 0);
        assert!(factory.created().is_empty());
    }
}
