//! Server configuration
//!
//! Loaded from an optional TOML file; every field has a default, so an empty
//! file (or none at all) is a valid configuration. Command-line flags are
//! applied on top by the binary.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::media::encode::DEFAULT_JPEG_QUALITY;
use crate::media::ImageCodec;
use crate::source::relay::DEFAULT_RELAY_CAPACITY;
use crate::source::{Binaries, CameraTable, CaptureGeometry, RetryPolicy, SharingMode, SourceSpec};

/// GStreamer pipeline for the CSI camera module
pub const CSI_PIPELINE: &str =
    "libcamerasrc ! video/x-raw,width=640,height=480 ! videoconvert ! appsink";

/// Public STUN server used when none is configured
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Uploads up to 256 MiB
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Annotation worker pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Dedicated annotation threads; 1 serialises accelerator access
    pub workers: usize,
    /// Frames waiting for a worker before sessions block
    pub queue_depth: usize,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            queue_depth: 4,
        }
    }
}

/// Server configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent sessions (0 = unlimited)
    pub max_sessions: usize,

    /// Selectable cameras by name
    pub cameras: CameraTable,

    /// Camera for peer media offers that name none
    pub default_camera: String,

    /// Camera for MJPEG and socket viewers that name none
    pub feed_camera: String,

    /// Size and rate of decoded frames
    pub capture: CaptureGeometry,

    /// JPEG quality for MJPEG, socket and batch output
    pub jpeg_quality: u8,

    /// Image codec of socket messages
    pub socket_codec: ImageCodec,

    /// What happens when a second session asks for an open device
    pub sharing: SharingMode,

    /// Device read retry behaviour
    pub retry: RetryPolicy,

    pub annotation: AnnotationConfig,

    /// STUN servers offered to peer connections
    pub stun_servers: Vec<String>,

    /// External decoder/encoder binaries
    pub binaries: Binaries,

    /// Encoded MJPEG parts buffered per viewer
    pub mjpeg_capacity: usize,

    /// Frames buffered per device relay
    pub relay_capacity: usize,

    /// Largest accepted `/detect` upload in bytes
    pub max_upload_bytes: usize,
}

/// The built-in camera table: `csi`, `usb` and `peer`
pub fn default_cameras() -> CameraTable {
    let mut cameras = CameraTable::new();
    cameras.insert(
        "csi".to_string(),
        SourceSpec::Device {
            index: None,
            pipeline: Some(CSI_PIPELINE.to_string()),
        },
    );
    cameras.insert(
        "usb".to_string(),
        SourceSpec::Device {
            index: Some(0),
            pipeline: None,
        },
    );
    cameras.insert("peer".to_string(), SourceSpec::Peer);
    cameras
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            max_sessions: 0, // Unlimited
            cameras: default_cameras(),
            default_camera: "csi".to_string(),
            feed_camera: "usb".to_string(),
            capture: CaptureGeometry::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            socket_codec: ImageCodec::Jpeg,
            sharing: SharingMode::Relay,
            retry: RetryPolicy::default(),
            annotation: AnnotationConfig::default(),
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            binaries: Binaries::default(),
            mjpeg_capacity: 2,
            relay_capacity: DEFAULT_RELAY_CAPACITY,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Read a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text, &path.display().to_string())
    }

    /// Parse TOML text; `origin` names the text in errors
    pub fn from_toml(text: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum sessions
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Add or replace a camera
    pub fn camera(mut self, name: impl Into<String>, spec: SourceSpec) -> Self {
        self.cameras.insert(name.into(), spec);
        self
    }

    /// Set the camera used by offers that name none
    pub fn default_camera(mut self, name: impl Into<String>) -> Self {
        self.default_camera = name.into();
        self
    }

    /// Set the camera used by MJPEG and socket viewers
    pub fn feed_camera(mut self, name: impl Into<String>) -> Self {
        self.feed_camera = name.into();
        self
    }

    /// Set the capture geometry
    pub fn capture(mut self, geometry: CaptureGeometry) -> Self {
        self.capture = geometry;
        self
    }

    /// Set the device sharing mode
    pub fn sharing(mut self, mode: SharingMode) -> Self {
        self.sharing = mode;
        self
    }

    /// Set the socket image codec
    pub fn socket_codec(mut self, codec: ImageCodec) -> Self {
        self.socket_codec = codec;
        self
    }

    /// Replace the STUN server list
    pub fn stun_servers(mut self, servers: Vec<String>) -> Self {
        self.stun_servers = servers;
        self
    }

    /// Check values that would only fail once a viewer connects
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: String| ConfigError::Invalid { field, reason };

        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(invalid(
                "capture",
                format!("{}x{} is not a frame size", self.capture.width, self.capture.height),
            ));
        }
        if self.capture.fps == 0 {
            return Err(invalid("capture.fps", "must be at least 1".to_string()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(invalid(
                "jpeg_quality",
                format!("{} is outside 1..=100", self.jpeg_quality),
            ));
        }
        if self.annotation.workers == 0 {
            return Err(invalid("annotation.workers", "must be at least 1".to_string()));
        }
        if self.stun_servers.iter().any(|url| url.trim().is_empty()) {
            return Err(invalid("stun_servers", "contains an empty entry".to_string()));
        }

        for (name, spec) in &self.cameras {
            if let Some(Err(e)) = spec.device() {
                return Err(invalid("cameras", format!("{}: {}", name, e)));
            }
        }
        if !self.cameras.contains_key(&self.default_camera) {
            return Err(invalid(
                "default_camera",
                format!("'{}' is not in the camera table", self.default_camera),
            ));
        }
        match self.cameras.get(&self.feed_camera) {
            None => Err(invalid(
                "feed_camera",
                format!("'{}' is not in the camera table", self.feed_camera),
            )),
            Some(spec) if spec.is_peer() => Err(invalid(
                "feed_camera",
                "a peer track can only feed peer media sessions".to_string(),
            )),
            Some(_) => Ok(()),
        }
    }
}
