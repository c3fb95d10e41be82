//! Peer media signaling
//!
//! A viewer posts an SDP offer; the server answers and starts a session
//! whose sink is the negotiated outbound video track.
//!
//! ```text
//!  POST /offer ──► SignalingHandler::negotiate
//!                     │ validate, resolve camera, register
//!                     │ acquire source (DeviceHub)
//!                     ▼
//!                  PeerConnector::connect ──► PeerLink { answer, writer, state, inbound }
//!                     │
//!                     ▼
//!                  Session(PeerMediaSink) spawned ──► answer returned
//! ```
//!
//! Peer connections are reached through the [`PeerConnector`] trait.
//! [`WebRtcConnector`] is the production implementation; tests plug in
//! connectors that never touch the network.

pub mod handler;
pub mod rtc;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::error::SignalingError;
use crate::media::{Frame, VideoDecoder};
use crate::sink::{PeerState, SampleWriter};

pub use self::handler::SignalingHandler;
pub use self::rtc::WebRtcConnector;

/// Body of `POST /offer`
#[derive(Debug, Clone, Deserialize)]
pub struct OfferRequest {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Camera name from the camera table; the default camera when absent
    #[serde(default)]
    pub camera: Option<String>,
}

impl OfferRequest {
    /// Reject anything that is not a non-empty offer
    pub fn validate(&self) -> Result<(), SignalingError> {
        if self.kind != "offer" {
            return Err(SignalingError::InvalidOffer(format!(
                "expected type 'offer', got '{}'",
                self.kind
            )));
        }
        if self.sdp.trim().is_empty() {
            return Err(SignalingError::InvalidOffer("empty sdp".to_string()));
        }
        Ok(())
    }
}

/// Response of `POST /offer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerResponse {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl AnswerResponse {
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: "answer".to_string(),
        }
    }
}

/// What the connector should negotiate
pub struct PeerRequest {
    /// The viewer's SDP offer
    pub offer_sdp: String,
    /// MIME type of the outbound video track
    pub mime_type: &'static str,
    /// Decoder for the viewer's own video; set when that track is the source
    pub inbound: Option<Box<dyn VideoDecoder>>,
}

impl fmt::Debug for PeerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerRequest")
            .field("mime_type", &self.mime_type)
            .field("inbound", &self.inbound.is_some())
            .finish()
    }
}

/// A negotiated peer connection
pub struct PeerLink {
    pub id: String,
    /// Local (answer) SDP, complete with candidates
    pub answer_sdp: String,
    /// Outbound video track
    pub writer: Arc<dyn SampleWriter>,
    pub state: watch::Receiver<PeerState>,
    /// Decoded frames from the viewer's track, when requested
    pub inbound: Option<mpsc::Receiver<Frame>>,
    /// Tears the connection down
    pub closer: BoxFuture<'static, ()>,
}

/// Negotiates peer connections
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, request: PeerRequest) -> Result<PeerLink, SignalingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(kind: &str, sdp: &str) -> OfferRequest {
        OfferRequest {
            sdp: sdp.to_string(),
            kind: kind.to_string(),
            camera: None,
        }
    }

    #[test]
    fn test_offer_validation() {
        assert!(offer("offer", "v=0\r\n").validate().is_ok());
        assert!(matches!(
            offer("answer", "v=0\r\n").validate(),
            Err(SignalingError::InvalidOffer(_))
        ));
        assert!(matches!(
            offer("offer", "  ").validate(),
            Err(SignalingError::InvalidOffer(_))
        ));
    }

    #[test]
    fn test_offer_json() {
        let request: OfferRequest =
            serde_json::from_str(r#"{"sdp":"v=0","type":"offer","camera":"usb"}"#).unwrap();
        assert_eq!(request.kind, "offer");
        assert_eq!(request.camera.as_deref(), Some("usb"));

        let request: OfferRequest = serde_json::from_str(r#"{"sdp":"v=0","type":"offer"}"#).unwrap();
        assert_eq!(request.camera, None);

        let json = serde_json::to_string(&AnswerResponse::answer("v=0")).unwrap();
        assert_eq!(json, r#"{"sdp":"v=0","type":"answer"}"#);
    }
}
