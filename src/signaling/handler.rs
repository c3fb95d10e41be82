//! Offer/answer negotiation

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use super::{AnswerResponse, OfferRequest, PeerConnector, PeerLink, PeerRequest};
use crate::error::SignalingError;
use crate::media::CodecProvider;
use crate::registry::SessionDescriptor;
use crate::session::SessionLauncher;
use crate::sink::{PeerMediaSink, TransportKind};
use crate::source::{CameraTable, CaptureGeometry, FrameSource, PeerTrackSource, SourceSpec};

/// Turns offers into running peer media sessions
///
/// Each negotiation is independent; concurrent offers for the same camera
/// share the device according to the hub's sharing mode.
pub struct SignalingHandler {
    launcher: Arc<SessionLauncher>,
    connector: Arc<dyn PeerConnector>,
    codecs: Arc<dyn CodecProvider>,
    cameras: CameraTable,
    default_camera: String,
    geometry: CaptureGeometry,
}

impl SignalingHandler {
    pub fn new(
        launcher: Arc<SessionLauncher>,
        connector: Arc<dyn PeerConnector>,
        codecs: Arc<dyn CodecProvider>,
        geometry: CaptureGeometry,
    ) -> Self {
        Self {
            launcher,
            connector,
            codecs,
            cameras: CameraTable::new(),
            default_camera: String::new(),
            geometry,
        }
    }

    /// Set the selectable cameras and the one used when an offer names none
    pub fn cameras(mut self, cameras: CameraTable, default_camera: impl Into<String>) -> Self {
        self.cameras = cameras;
        self.default_camera = default_camera.into();
        self
    }

    /// Look up a camera by name, falling back to the default camera
    pub fn resolve(&self, camera: Option<&str>) -> Result<(String, SourceSpec), SignalingError> {
        let name = camera.unwrap_or(&self.default_camera);
        self.cameras
            .get(name)
            .map(|spec| (name.to_string(), spec.clone()))
            .ok_or_else(|| SignalingError::UnknownCamera(name.to_string()))
    }

    /// Negotiate an offer and start its session
    ///
    /// Registry and device errors surface before any answer is produced, so
    /// a rejected viewer never gets a half-open connection.
    pub async fn negotiate(
        &self,
        offer: OfferRequest,
        peer: Option<SocketAddr>,
    ) -> Result<AnswerResponse, SignalingError> {
        offer.validate()?;
        let (camera, spec) = self.resolve(offer.camera.as_deref())?;

        let mut descriptor = SessionDescriptor::new(TransportKind::Peer, spec.to_string());
        if let Some(addr) = peer {
            descriptor = descriptor.peer(addr);
        }
        let guard = self.launcher.register(descriptor)?;

        let geometry = self.geometry;
        let encoder = self
            .codecs
            .encoder(geometry.width, geometry.height, geometry.fps)?;
        let decoder = if spec.is_peer() {
            Some(self.codecs.decoder()?)
        } else {
            None
        };

        let mut acquired = if spec.is_peer() {
            None
        } else {
            Some(self.launcher.acquire(&spec).await?)
        };

        let request = PeerRequest {
            offer_sdp: offer.sdp,
            mime_type: self.codecs.mime_type(),
            inbound: decoder,
        };
        let link = match self.connector.connect(request).await {
            Ok(link) => link,
            Err(e) => {
                if let Some(source) = acquired.as_mut() {
                    source.close().await;
                }
                tracing::warn!(session_id = guard.id(), camera = %camera, error = %e, "Peer negotiation failed");
                return Err(e);
            }
        };
        let PeerLink {
            id: link_id,
            answer_sdp,
            writer,
            state,
            inbound,
            closer,
        } = link;

        let source: Box<dyn FrameSource> = match (acquired, inbound) {
            (Some(source), _) => source,
            (None, Some(frames)) => Box::new(
                PeerTrackSource::new(format!("peer:{}", link_id), frames, guard.cancel_token())
                    .peer_state(state.clone()),
            ),
            (None, None) => {
                closer.await;
                return Err(SignalingError::Peer(
                    "connection has no inbound video track".to_string(),
                ));
            }
        };

        let frame_interval = Duration::from_secs(1) / geometry.fps.max(1);
        let sink = PeerMediaSink::new(writer, encoder, state, frame_interval)
            .counters(guard.counters())
            .on_close(closer);

        let session_id = guard.id();
        self.launcher.launch(guard, source, Box::new(sink));

        tracing::info!(
            session_id = session_id,
            camera = %camera,
            peer_id = %link_id,
            "Peer session negotiated"
        );

        Ok(AnswerResponse::answer(answer_sdp))
    }
}
