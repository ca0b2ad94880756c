//! Control DataChannel ingress
//!
//! Browsers open a data channel on the peer connection and send key
//! commands as JSON text, e.g. `{"Key":"w","Action":"pressed"}`. Each
//! message is handed to the [`CommandRouter`] in arrival order.

use super::WebRTCError;
use crate::control::CommandRouter;
use bytes::Bytes;
use log::{debug, info, warn};
use std::sync::Arc;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;

/// Extract the text payload of a data channel message
pub fn message_text(is_string: bool, data: &Bytes) -> Result<&str, WebRTCError> {
    if !is_string {
        debug!("Binary control message ({} bytes)", data.len());
    }
    std::str::from_utf8(data).map_err(|e| WebRTCError::Protocol(format!("Control message is not UTF-8: {}", e)))
}

/// Route every data channel the remote peer opens into the command router
pub fn attach_control_channel(peer_connection: &Arc<RTCPeerConnection>, peer_id: &str, router: Arc<CommandRouter>) {
    let peer_id = peer_id.to_string();
    peer_connection.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
        let peer_id = peer_id.clone();
        let router = router.clone();
        Box::pin(async move {
            info!("Peer {} opened data channel '{}'", peer_id, channel.label());

            // on_message is awaited per message, which keeps commands ordered
            channel.on_message(Box::new(move |msg: DataChannelMessage| {
                let peer_id = peer_id.clone();
                let router = router.clone();
                Box::pin(async move {
                    match message_text(msg.is_string, &msg.data) {
                        Ok(text) => router.handle_message(text).await,
                        Err(e) => warn!("Peer {}: {}", peer_id, e),
                    }
                })
            }));
        })
    }));
}
