//! WebRTC PeerConnection management
//!
//! Builds webrtc-rs peer connections with the negotiated codecs, wraps them
//! as [`MediaSession`]s and wires their callbacks into session events.

use super::data_channel;
use super::media_track::{audio_capability, video_capability, OutboundTracks};
use super::session::{MediaSession, SdpKind, SessionEvents, SessionFactory, SignalingState};
use super::signaling::CandidateInit;
use super::WebRTCError;
use crate::config::WebRTCConfig;
use crate::control::CommandRouter;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecParameters, RTPCodecType};
use webrtc::track::track_local::TrackLocal;

/// PeerConnection factory configured once at startup
pub struct PeerConnectionManager {
    config: WebRTCConfig,
    api: API,
}

impl PeerConnectionManager {
    /// Create a new PeerConnection manager
    pub fn new(config: WebRTCConfig) -> Result<Self, WebRTCError> {
        let mut media_engine = MediaEngine::default();
        register_codecs(&config, &mut media_engine)?;

        // Create interceptor registry for RTCP feedback
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| WebRTCError::ConnectionFailed(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { config, api })
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = self
            .config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }

    /// Create a new PeerConnection with the configured settings
    pub async fn create_peer_connection(&self) -> Result<Arc<RTCPeerConnection>, WebRTCError> {
        let peer_connection = self
            .api
            .new_peer_connection(self.rtc_configuration())
            .await
            .map_err(|e| WebRTCError::ConnectionFailed(format!("Failed to create peer connection: {}", e)))?;

        Ok(Arc::new(peer_connection))
    }
}

/// Register exactly the codecs the relay produces, at the negotiated payload types
fn register_codecs(config: &WebRTCConfig, media_engine: &mut MediaEngine) -> Result<(), WebRTCError> {
    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: video_capability(config),
                payload_type: config.video_payload_type,
                ..Default::default()
            },
            RTPCodecType::Video,
        )
        .map_err(|e| {
            WebRTCError::ConnectionFailed(format!("Failed to register {}: {}", config.video_codec.as_str(), e))
        })?;

    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: audio_capability(),
                payload_type: config.audio_payload_type,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )
        .map_err(|e| WebRTCError::ConnectionFailed(format!("Failed to register Opus: {}", e)))?;

    Ok(())
}

/// [`MediaSession`] backed by an `RTCPeerConnection`
pub struct RtcMediaSession {
    peer_connection: Arc<RTCPeerConnection>,
}

impl RtcMediaSession {
    pub fn new(peer_connection: Arc<RTCPeerConnection>) -> Self {
        Self { peer_connection }
    }
}

fn map_signaling_state(state: RTCSignalingState) -> SignalingState {
    match state {
        RTCSignalingState::HaveLocalOffer | RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalOffer,
        RTCSignalingState::HaveRemoteOffer | RTCSignalingState::HaveRemotePranswer => {
            SignalingState::HaveRemoteOffer
        }
        RTCSignalingState::Closed => SignalingState::Closed,
        _ => SignalingState::Stable,
    }
}

#[async_trait]
impl MediaSession for RtcMediaSession {
    fn signaling_state(&self) -> SignalingState {
        map_signaling_state(self.peer_connection.signaling_state())
    }

    async fn has_remote_description(&self) -> bool {
        self.peer_connection.remote_description().await.is_some()
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<String, WebRTCError> {
        let options = ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });

        let offer = self
            .peer_connection
            .create_offer(options)
            .await
            .map_err(|e| WebRTCError::Negotiation(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| WebRTCError::Negotiation(format!("Failed to set local description: {}", e)))?;

        Ok(offer.sdp)
    }

    async fn create_answer(&self) -> Result<String, WebRTCError> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| WebRTCError::Negotiation(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| WebRTCError::Negotiation(format!("Failed to set local description: {}", e)))?;

        Ok(answer.sdp)
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<(), WebRTCError> {
        let description = match kind {
            SdpKind::Offer => RTCSessionDescription::offer(sdp.to_string()),
            SdpKind::Answer => RTCSessionDescription::answer(sdp.to_string()),
        }
        .map_err(|e| WebRTCError::Negotiation(format!("Invalid SDP {:?}: {}", kind, e)))?;

        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| WebRTCError::Negotiation(format!("Failed to set remote description: {}", e)))
    }

    async fn rollback(&self) -> Result<(), WebRTCError> {
        // An empty rollback description is rejected before it reaches the state machine
        let pending = self
            .peer_connection
            .pending_local_description()
            .await
            .ok_or_else(|| WebRTCError::Negotiation("No local offer to roll back".to_string()))?;

        let mut rollback = RTCSessionDescription::default();
        rollback.sdp_type = RTCSdpType::Rollback;
        rollback.sdp = pending.sdp;

        self.peer_connection
            .set_local_description(rollback)
            .await
            .map_err(|e| WebRTCError::Negotiation(format!("Rollback failed: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<(), WebRTCError> {
        let candidate_init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };

        self.peer_connection
            .add_ice_candidate(candidate_init)
            .await
            .map_err(|e| WebRTCError::Ice(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<(), WebRTCError> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| WebRTCError::ConnectionFailed(format!("Close failed: {}", e)))
    }
}

/// Creates webrtc-rs sessions carrying the shared outbound tracks and the
/// control data channel
pub struct RtcSessionFactory {
    manager: PeerConnectionManager,
    tracks: OutboundTracks,
    router: Arc<CommandRouter>,
}

impl RtcSessionFactory {
    pub fn new(manager: PeerConnectionManager, tracks: OutboundTracks, router: Arc<CommandRouter>) -> Self {
        Self { manager, tracks, router }
    }
}

#[async_trait]
impl SessionFactory for RtcSessionFactory {
    async fn create(&self, events: SessionEvents) -> Result<Arc<dyn MediaSession>, WebRTCError> {
        let peer_connection = self.manager.create_peer_connection().await?;
        let peer_id = events.peer_id().to_string();

        // Callbacks go in before the tracks so the first negotiation-needed is seen
        let ev = events.clone();
        peer_connection.on_negotiation_needed(Box::new(move || {
            let ev = ev.clone();
            Box::pin(async move {
                ev.negotiation_needed();
            })
        }));

        let ev = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let ev = ev.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => ev.local_candidate(CandidateInit {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                    }),
                    Err(e) => warn!("Peer {}: failed to encode local candidate: {}", ev.peer_id(), e),
                }
            })
        }));

        let ev = events.clone();
        peer_connection.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let ev = ev.clone();
            Box::pin(async move {
                debug!("Peer {} ICE state: {}", ev.peer_id(), state);
                if state == RTCIceConnectionState::Disconnected {
                    ev.ice_disconnected();
                }
            })
        }));

        let ev = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let ev = ev.clone();
            Box::pin(async move {
                info!("Peer {} connection state: {}", ev.peer_id(), state);
                if state == RTCPeerConnectionState::Failed {
                    ev.failed();
                }
            })
        }));

        data_channel::attach_control_channel(&peer_connection, &peer_id, self.router.clone());

        for track in self.tracks.all() {
            let track_id = track.id().to_string();
            let sender = peer_connection
                .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| WebRTCError::Media(format!("Failed to add {} track: {}", track_id, e)))?;

            // Drain RTCP so interceptors keep working
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while sender.read(&mut rtcp_buf).await.is_ok() {}
            });
        }

        Ok(Arc::new(RtcMediaSession::new(peer_connection)))
    }
}
