//! Outbound media tracks
//!
//! One static RTP track per media kind, created once and added to every
//! peer session so a single relay pump feeds all peers.

use super::WebRTCError;
use crate::config::WebRTCConfig;
use crate::relay::RtpSink;
use async_trait::async_trait;
use std::sync::Arc;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};

const STREAM_ID: &str = "teleop-stream";

pub(crate) fn video_capability(config: &WebRTCConfig) -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: config.video_codec.mime_type().to_string(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: config.video_codec.sdp_fmtp_line().to_string(),
        rtcp_feedback: vec![],
    }
}

pub(crate) fn audio_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

/// Tracks shared by all peer sessions
#[derive(Clone)]
pub struct OutboundTracks {
    pub video: Arc<TrackLocalStaticRTP>,
    pub audio: Arc<TrackLocalStaticRTP>,
}

impl OutboundTracks {
    pub fn new(config: &WebRTCConfig) -> Self {
        let video = TrackLocalStaticRTP::new(video_capability(config), "video".to_string(), STREAM_ID.to_string());
        let audio = TrackLocalStaticRTP::new(audio_capability(), "audio".to_string(), STREAM_ID.to_string());

        Self {
            video: Arc::new(video),
            audio: Arc::new(audio),
        }
    }

    pub fn all(&self) -> [Arc<TrackLocalStaticRTP>; 2] {
        [self.video.clone(), self.audio.clone()]
    }
}

#[async_trait]
impl RtpSink for TrackLocalStaticRTP {
    async fn write_rtp(&self, packet: &Packet) -> Result<(), WebRTCError> {
        TrackLocalWriter::write_rtp(self, packet)
            .await
            .map(|_| ())
            .map_err(|e| WebRTCError::Media(format!("Track {} write failed: {}", self.id(), e)))
    }
}
