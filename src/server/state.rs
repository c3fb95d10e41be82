//! Shared handler state

use std::sync::Arc;

use crate::annotate::{Annotate, AnnotationQueue};
use crate::batch::{BatchAnnotator, ClipEncoder, ClipInspector, FfmpegClipEncoder, FfprobeInspector};
use crate::error::Result;
use crate::media::{default_codecs, CodecProvider, ImageEncoder, OverlayStyle};
use crate::registry::{RegistryConfig, SessionRegistry};
use crate::server::config::ServerConfig;
use crate::server::error::ApiError;
use crate::session::SessionLauncher;
use crate::signaling::{PeerConnector, SignalingHandler, WebRtcConnector};
use crate::source::{DeviceHub, ProcessReaderOpener, ReaderOpener, SourceFactory, SourceSpec};

/// The pluggable edges of the server
///
/// [`StateParts::production`] wires subprocess readers, WebRTC and ffmpeg;
/// tests swap in in-memory versions.
pub struct StateParts {
    pub annotator: Arc<dyn Annotate>,
    pub opener: Arc<dyn ReaderOpener>,
    pub connector: Arc<dyn PeerConnector>,
    pub codecs: Arc<dyn CodecProvider>,
    pub clips: Arc<dyn ClipEncoder>,
    /// Size and rate of uploaded videos; capture geometry when absent
    pub inspector: Option<Arc<dyn ClipInspector>>,
}

impl StateParts {
    pub fn production(config: &ServerConfig, annotator: Arc<dyn Annotate>) -> Self {
        Self {
            annotator,
            opener: Arc::new(ProcessReaderOpener {
                geometry: config.capture,
                binaries: config.binaries.clone(),
            }),
            connector: Arc::new(WebRtcConnector::new(config.stun_servers.clone())),
            codecs: Arc::from(default_codecs()),
            clips: Arc::new(FfmpegClipEncoder::new(config.binaries.ffmpeg.clone())),
            inspector: Some(Arc::new(FfprobeInspector::new(config.binaries.ffprobe.clone()))),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub launcher: Arc<SessionLauncher>,
    pub signaling: Arc<SignalingHandler>,
    pub batch: Arc<BatchAnnotator>,
    /// MJPEG parts are always JPEG
    pub mjpeg_encoder: ImageEncoder,
    pub socket_encoder: ImageEncoder,
}

impl AppState {
    /// Build the production state
    pub fn new(config: ServerConfig, annotator: Arc<dyn Annotate>) -> Result<Self> {
        let parts = StateParts::production(&config, annotator);
        Self::from_parts(config, parts)
    }

    /// Validate the config and assemble the state around `parts`
    ///
    /// Starts the annotation worker pool, which is shared by every live
    /// session and by batch uploads.
    pub fn from_parts(config: ServerConfig, parts: StateParts) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(SessionRegistry::with_config(
            RegistryConfig::default().max_sessions(config.max_sessions),
        ));
        let hub = DeviceHub::new(Arc::clone(&parts.opener), config.sharing, config.retry)
            .relay_capacity(config.relay_capacity);
        let sources = SourceFactory::new(Arc::clone(&parts.opener), hub, config.capture.fps);
        let queue = AnnotationQueue::start(
            parts.annotator,
            config.annotation.workers,
            config.annotation.queue_depth,
        )?;

        let launcher = Arc::new(SessionLauncher::new(
            registry,
            sources,
            queue.clone(),
            OverlayStyle::default(),
        ));
        let signaling = SignalingHandler::new(
            Arc::clone(&launcher),
            parts.connector,
            parts.codecs,
            config.capture,
        )
        .cameras(config.cameras.clone(), config.default_camera.clone());

        let mjpeg_encoder = ImageEncoder::jpeg(config.jpeg_quality);
        let mut batch = BatchAnnotator::new(queue, parts.opener, parts.clips, config.capture.fps)
            .image_encoder(mjpeg_encoder);
        if let Some(inspector) = parts.inspector {
            batch = batch.inspector(inspector);
        }

        tracing::debug!(
            annotator = %launcher.queue().annotator_name(),
            workers = config.annotation.workers,
            cameras = config.cameras.len(),
            "Application state ready"
        );

        Ok(Self {
            socket_encoder: ImageEncoder::new(config.socket_codec, config.jpeg_quality),
            mjpeg_encoder,
            config: Arc::new(config),
            launcher,
            signaling: Arc::new(signaling),
            batch: Arc::new(batch),
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.launcher.registry()
    }

    /// Resolve the camera for an MJPEG or socket viewer
    ///
    /// Falls back to the feed camera. Peer cameras are refused: those
    /// transports have no inbound track.
    pub fn feed_camera(&self, camera: Option<&str>) -> std::result::Result<SourceSpec, ApiError> {
        let name = camera.unwrap_or(&self.config.feed_camera);
        match self.config.cameras.get(name) {
            None => Err(ApiError::BadRequest(format!("unknown camera: {}", name))),
            Some(spec) if spec.is_peer() => Err(ApiError::BadRequest(format!(
                "camera '{}' is only available to peer media sessions",
                name
            ))),
            Some(spec) => Ok(spec.clone()),
        }
    }
}
