//! In-memory media sessions for negotiation tests

use super::session::{MediaSession, SdpKind, SessionEvents, SessionFactory, SignalingState};
use super::signaling::{CandidateInit, PeerId};
use super::WebRTCError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    CreateOffer { ice_restart: bool },
    CreateAnswer,
    SetRemote(SdpKind),
    Rollback,
    AddCandidate(String),
    Close,
}

/// Media session following the JSEP signaling state rules without a network
pub struct FakeMediaSession {
    state: Mutex<SignalingState>,
    has_remote: AtomicBool,
    calls: Mutex<Vec<FakeCall>>,
    candidates: Mutex<Vec<CandidateInit>>,
    offers: AtomicU32,
    fail_remote: AtomicBool,
    hold_offers: AtomicBool,
    offer_started: Notify,
    offer_release: Notify,
}

impl Default for FakeMediaSession {
    fn default() -> Self {
        Self {
            state: Mutex::new(SignalingState::Stable),
            has_remote: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            offers: AtomicU32::new(0),
            fail_remote: AtomicBool::new(false),
            hold_offers: AtomicBool::new(false),
            offer_started: Notify::new(),
            offer_release: Notify::new(),
        }
    }
}

impl FakeMediaSession {
    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().clone()
    }

    pub fn applied_candidates(&self) -> Vec<CandidateInit> {
        self.candidates.lock().clone()
    }

    /// Make the next remote description fail without changing state
    pub fn fail_next_remote(&self) {
        self.fail_remote.store(true, Ordering::SeqCst);
    }

    /// Park `create_offer` until [`release_offers`](Self::release_offers)
    pub fn hold_offers(&self) {
        self.hold_offers.store(true, Ordering::SeqCst);
    }

    pub async fn wait_offer_started(&self) {
        self.offer_started.notified().await;
    }

    pub fn release_offers(&self) {
        self.offer_release.notify_one();
    }

    fn record(&self, call: FakeCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl MediaSession for FakeMediaSession {
    fn signaling_state(&self) -> SignalingState {
        *self.state.lock()
    }

    async fn has_remote_description(&self) -> bool {
        self.has_remote.load(Ordering::SeqCst)
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<String, WebRTCError> {
        self.record(FakeCall::CreateOffer { ice_restart });
        if self.hold_offers.load(Ordering::SeqCst) {
            self.offer_started.notify_one();
            self.offer_release.notified().await;
        }

        let mut state = self.state.lock();
        match *state {
            SignalingState::Stable | SignalingState::HaveLocalOffer => {
                *state = SignalingState::HaveLocalOffer;
                let n = self.offers.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(format!("v=0 offer {}", n))
            }
            other => Err(WebRTCError::Negotiation(format!("cannot offer in {:?}", other))),
        }
    }

    async fn create_answer(&self) -> Result<String, WebRTCError> {
        self.record(FakeCall::CreateAnswer);
        let mut state = self.state.lock();
        if *state != SignalingState::HaveRemoteOffer {
            return Err(WebRTCError::Negotiation(format!("cannot answer in {:?}", *state)));
        }
        *state = SignalingState::Stable;
        Ok("v=0 answer".to_string())
    }

    async fn set_remote_description(&self, kind: SdpKind, _sdp: &str) -> Result<(), WebRTCError> {
        self.record(FakeCall::SetRemote(kind));
        if self.fail_remote.swap(false, Ordering::SeqCst) {
            return Err(WebRTCError::Negotiation("unparsable sdp".to_string()));
        }

        let mut state = self.state.lock();
        let next = match (kind, *state) {
            (SdpKind::Offer, SignalingState::Stable) => SignalingState::HaveRemoteOffer,
            (SdpKind::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
            (kind, other) => {
                return Err(WebRTCError::Negotiation(format!("remote {:?} in {:?}", kind, other)));
            }
        };
        *state = next;
        self.has_remote.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), WebRTCError> {
        self.record(FakeCall::Rollback);
        *self.state.lock() = SignalingState::Stable;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<(), WebRTCError> {
        self.record(FakeCall::AddCandidate(candidate.candidate.clone()));
        if !self.has_remote.load(Ordering::SeqCst) {
            return Err(WebRTCError::Ice("no remote description".to_string()));
        }
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), WebRTCError> {
        self.record(FakeCall::Close);
        *self.state.lock() = SignalingState::Closed;
        Ok(())
    }
}

/// Factory producing [`FakeMediaSession`]s
#[derive(Default)]
pub struct FakeFactory {
    negotiate_on_create: bool,
    created: Mutex<Vec<(PeerId, Arc<FakeMediaSession>)>>,
}

impl FakeFactory {
    /// Sessions raise "negotiation needed" once when created, like a
    /// session that just had its tracks attached
    pub fn negotiating() -> Self {
        Self {
            negotiate_on_create: true,
            ..Default::default()
        }
    }

    pub fn created(&self) -> Vec<(PeerId, Arc<FakeMediaSession>)> {
        self.created.lock().clone()
    }

    /// Most recent media session created for a peer
    pub fn media_for(&self, peer_id: &str) -> Option<Arc<FakeMediaSession>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|(peer, _)| peer == peer_id)
            .map(|(_, media)| media.clone())
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn create(&self, events: SessionEvents) -> Result<Arc<dyn MediaSession>, WebRTCError> {
        let media = Arc::new(FakeMediaSession::default());
        self.created.lock().push((events.peer_id().to_string(), media.clone()));
        if self.negotiate_on_create {
            events.negotiation_needed();
        }
        Ok(media)
    }
}
