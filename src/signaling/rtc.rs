//! WebRTC peer connections
//!
//! One `RTCPeerConnection` per viewer, with default codecs and interceptors.
//! ICE is not trickled: the answer is returned once gathering completes, so
//! a single HTTP round trip is enough for the viewer.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::io::sample_builder::SampleBuilder;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::codecs::h264::H264Packet;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::{PeerConnector, PeerLink, PeerRequest};
use crate::error::SignalingError;
use crate::media::{Frame, PixelFormat, VideoDecoder};
use crate::sink::PeerState;

/// Decoded inbound frames buffered per connection
const INBOUND_CAPACITY: usize = 2;

/// Packets the inbound sample builder may hold back for reordering
const MAX_LATE_PACKETS: u16 = 64;

/// RTP clock rate of video tracks
const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Map the connection state onto the sink's view of it
pub fn peer_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => PeerState::New,
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
    }
}

fn peer_error(context: &str, e: impl std::fmt::Display) -> SignalingError {
    SignalingError::Peer(format!("{}: {}", context, e))
}

/// Production [`PeerConnector`]
#[derive(Debug, Clone)]
pub struct WebRtcConnector {
    stun_servers: Vec<String>,
}

impl WebRtcConnector {
    pub fn new(stun_servers: Vec<String>) -> Self {
        Self { stun_servers }
    }

    async fn peer_connection(&self) -> Result<Arc<RTCPeerConnection>, SignalingError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| peer_error("register codecs", e))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| peer_error("register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self
                .stun_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = api
            .new_peer_connection(config)
            .await
            .map_err(|e| peer_error("create peer connection", e))?;
        Ok(Arc::new(pc))
    }

    async fn negotiate(
        &self,
        pc: &Arc<RTCPeerConnection>,
        id: &str,
        request: PeerRequest,
    ) -> Result<PeerLink, SignalingError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: request.mime_type.to_string(),
                ..Default::default()
            },
            "video".to_string(),
            format!("framecast-{}", id),
        ));
        let sender = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| peer_error("add track", e))?;

        // RTCP has to be drained for the interceptors to work
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        let (state_tx, state_rx) = watch::channel(PeerState::New);
        let state_tx = Arc::new(state_tx);
        let peer_id = id.to_string();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let mapped = peer_state(state);
            tracing::debug!(peer_id = %peer_id, state = %mapped, "Peer state changed");
            state_tx.send_replace(mapped);
            Box::pin(async {})
        }));

        let inbound = request.inbound.map(|decoder| {
            let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
            // The reader task becomes the only sender, so the channel closes with the track
            let pending = Arc::new(Mutex::new(Some((decoder, tx))));
            let peer_id = id.to_string();

            pc.on_track(Box::new(move |remote: Arc<TrackRemote>, _receiver, _transceiver| {
                if remote.kind() == RTPCodecType::Video {
                    // Only the first video track feeds the session
                    if let Some((decoder, tx)) = pending.lock().take() {
                        tracing::info!(peer_id = %peer_id, "Inbound video track started");
                        tokio::spawn(read_inbound(remote, decoder, tx, peer_id.clone()));
                    }
                }
                Box::pin(async {})
            }));
            rx
        });

        let offer = RTCSessionDescription::offer(request.offer_sdp)
            .map_err(|e| SignalingError::InvalidOffer(e.to_string()))?;
        pc.set_remote_description(offer)
            .await
            .map_err(|e| SignalingError::InvalidOffer(e.to_string()))?;

        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| peer_error("create answer", e))?;
        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(answer)
            .await
            .map_err(|e| peer_error("set local description", e))?;
        let _ = gathered.recv().await;

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| SignalingError::Peer("no local description".to_string()))?;

        let closing = Arc::clone(pc);
        let closing_id = id.to_string();
        Ok(PeerLink {
            id: id.to_string(),
            answer_sdp: local.sdp,
            writer: track,
            state: state_rx,
            inbound,
            closer: Box::pin(async move {
                if let Err(e) = closing.close().await {
                    tracing::debug!(peer_id = %closing_id, error = %e, "Peer close failed");
                }
            }),
        })
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(&self, request: PeerRequest) -> Result<PeerLink, SignalingError> {
        let id = uuid::Uuid::new_v4().to_string();
        let pc = self.peer_connection().await?;

        match self.negotiate(&pc, &id, request).await {
            Ok(link) => {
                tracing::debug!(peer_id = %id, "Peer connection answered");
                Ok(link)
            }
            Err(e) => {
                let _ = pc.close().await;
                Err(e)
            }
        }
    }
}

/// Depacketize, decode and forward the viewer's video
async fn read_inbound(
    track: Arc<TrackRemote>,
    mut decoder: Box<dyn VideoDecoder>,
    frames: mpsc::Sender<Frame>,
    peer_id: String,
) {
    let mut builder = SampleBuilder::new(MAX_LATE_PACKETS, H264Packet::default(), VIDEO_CLOCK_RATE);
    let started = Instant::now();
    let mut sequence: u64 = 0;

    'read: while let Ok((packet, _)) = track.read_rtp().await {
        builder.push(packet);

        while let Some(sample) = builder.pop() {
            let payload: Bytes = sample.data;
            let (returned, decoded) = match tokio::task::spawn_blocking(move || {
                let decoded = decoder.decode(&payload);
                (decoder, decoded)
            })
            .await
            {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(peer_id = %peer_id, error = %e, "Inbound decoder task failed");
                    break 'read;
                }
            };
            decoder = returned;

            let image = match decoded {
                Ok(Some(image)) => image,
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(peer_id = %peer_id, error = %e, "Inbound sample dropped");
                    continue;
                }
            };

            let frame = match Frame::new(
                Bytes::from(image.rgb),
                image.width,
                image.height,
                PixelFormat::Rgb24,
                sequence,
                started.elapsed(),
            ) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!(peer_id = %peer_id, error = %e, "Inbound image rejected");
                    continue;
                }
            };
            sequence += 1;

            match frames.try_send(frame) {
                Ok(()) => {}
                // The session is behind; live video skips ahead
                Err(mpsc::error::TrySendError::Full(_)) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => break 'read,
            }
        }
    }

    tracing::info!(peer_id = %peer_id, frames = sequence, "Inbound video track ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mapping() {
        assert_eq!(peer_state(RTCPeerConnectionState::New), PeerState::New);
        assert_eq!(peer_state(RTCPeerConnectionState::Connected), PeerState::Connected);
        assert!(peer_state(RTCPeerConnectionState::Failed).is_terminal());
        assert!(peer_state(RTCPeerConnectionState::Disconnected).is_terminal());
        assert!(peer_state(RTCPeerConnectionState::Closed).is_terminal());
    }

    #[tokio::test]
    async fn test_garbage_offer_rejected() {
        let connector = WebRtcConnector::new(Vec::new());
        let request = PeerRequest {
            offer_sdp: "not an sdp".to_string(),
            mime_type: crate::media::codec::MIME_TYPE_H264,
            inbound: None,
        };

        let result = connector.connect(request).await;
        assert!(matches!(result, Err(SignalingError::InvalidOffer(_))));
    }
}
