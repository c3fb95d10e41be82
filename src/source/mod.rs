//! Frame sources
//!
//! A [`FrameSource`] supplies raw frames to one session. Three kinds exist:
//!
//! - [`FileSource`]: a decoded video file, optionally looping and paced
//! - [`DeviceSource`]: a local camera, recovering from transient read failures
//! - [`PeerTrackSource`]: frames decoded from the viewer's own media track
//!
//! File and device sources do not decode anything themselves. They pull
//! fixed-size raw images from a [`FrameReader`] produced by a
//! [`ReaderFactory`]; production readers are capture subprocesses (see
//! [`process`]), tests plug in in-memory readers.
//!
//! A source that returned `Ok(None)` or an error is terminal. The session
//! never reopens it; only [`DeviceSource`] reopens its device internally.

pub mod device;
pub mod file;
pub mod peer;
pub mod process;
pub mod relay;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::media::{Frame, PixelFormat};

pub use device::{DeviceSource, RetryPolicy};
pub use file::FileSource;
pub use peer::PeerTrackSource;
pub use process::{Binaries, CaptureGeometry, ProcessReaderFactory, ProcessReaderOpener, ReaderOpener};
pub use relay::{DeviceHub, RelaySource, SharingMode};

/// A supplier of raw frames for one session
#[async_trait]
pub trait FrameSource: Send {
    /// Human-readable identity used in logs and the session listing
    fn label(&self) -> String;

    /// Acquire the underlying resource
    async fn open(&mut self) -> Result<(), SourceError>;

    /// Pull the next frame; `Ok(None)` is end of stream
    async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Release the underlying resource; idempotent
    async fn close(&mut self);
}

/// One undecorated image from a reader
#[derive(Debug, Clone)]
pub struct RawImage {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl RawImage {
    /// Packed RGB image
    pub fn rgb(data: impl Into<Bytes>, width: u32, height: u32) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            format: PixelFormat::Rgb24,
        }
    }

    /// Attach timing to produce a frame
    pub fn into_frame(
        self,
        sequence: u64,
        timestamp: std::time::Duration,
    ) -> Result<Frame, SourceError> {
        Frame::new(
            self.data,
            self.width,
            self.height,
            self.format,
            sequence,
            timestamp,
        )
    }
}

/// An open stream of raw images
#[async_trait]
pub trait FrameReader: Send {
    /// Read the next image; `Ok(None)` when the stream ended cleanly
    async fn read_frame(&mut self) -> Result<Option<RawImage>, SourceError>;

    /// Stop the reader and release its resources
    async fn close(&mut self);
}

/// Opens readers for one file or device
#[async_trait]
pub trait ReaderFactory: Send + Sync {
    /// Identity of what this factory opens
    fn label(&self) -> String;

    /// Open a fresh reader positioned at the start
    async fn open(&self) -> Result<Box<dyn FrameReader>, SourceError>;
}

/// A physical capture device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSpec {
    /// V4L2 device index (`/dev/videoN`)
    Index(u32),
    /// GStreamer pipeline descriptor
    Pipeline(String),
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Index(index) => write!(f, "device:{}", index),
            DeviceSpec::Pipeline(pipeline) => write!(f, "pipeline:{}", pipeline),
        }
    }
}

/// What a session pulls its frames from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceSpec {
    /// A video file
    File {
        path: PathBuf,
        /// Restart from the beginning at end of file
        #[serde(rename = "loop", default)]
        looping: bool,
        /// Release frames at the file's native rate
        #[serde(default = "default_pace")]
        pace: bool,
    },
    /// A local camera, by index or pipeline descriptor (exactly one)
    Device {
        #[serde(default)]
        index: Option<u32>,
        #[serde(default)]
        pipeline: Option<String>,
    },
    /// The viewer's own outgoing media track (peer media only)
    Peer,
}

/// Named sources viewers can select (`csi`, `usb`, `peer`, ...)
pub type CameraTable = BTreeMap<String, SourceSpec>;

fn default_pace() -> bool {
    true
}

impl SourceSpec {
    /// Resolve a device spec, rejecting ambiguous or empty selections
    pub fn device(&self) -> Option<Result<DeviceSpec, SourceError>> {
        match self {
            SourceSpec::Device { index, pipeline } => Some(match (index, pipeline) {
                (Some(index), None) => Ok(DeviceSpec::Index(*index)),
                (None, Some(pipeline)) if !pipeline.trim().is_empty() => {
                    Ok(DeviceSpec::Pipeline(pipeline.clone()))
                }
                _ => Err(SourceError::Unsupported(
                    "device needs exactly one of index or pipeline".to_string(),
                )),
            }),
            _ => None,
        }
    }

    /// Whether this spec needs an inbound peer track
    pub fn is_peer(&self) -> bool {
        matches!(self, SourceSpec::Peer)
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::File { path, .. } => write!(f, "file:{}", path.display()),
            SourceSpec::Device { .. } => match self.device() {
                Some(Ok(device)) => write!(f, "{}", device),
                _ => write!(f, "device:invalid"),
            },
            SourceSpec::Peer => write!(f, "peer"),
        }
    }
}

/// Builds opened sources from specs
///
/// Devices always go through the [`DeviceHub`] so sharing rules apply to
/// every transport.
pub struct SourceFactory {
    opener: Arc<dyn ReaderOpener>,
    hub: DeviceHub,
    fps: u32,
}

impl SourceFactory {
    pub fn new(opener: Arc<dyn ReaderOpener>, hub: DeviceHub, fps: u32) -> Self {
        Self { opener, hub, fps }
    }

    /// The device hub
    pub fn hub(&self) -> &DeviceHub {
        &self.hub
    }

    /// Open a file or device source
    ///
    /// Peer sources are built by the signaling handler, which owns the track.
    pub async fn acquire(&self, spec: &SourceSpec) -> Result<Box<dyn FrameSource>, SourceError> {
        if let Some(device) = spec.device() {
            return self.hub.acquire(&device?).await;
        }

        match spec {
            SourceSpec::File {
                path,
                looping,
                pace,
            } => {
                let mut source = FileSource::new(self.opener.file(path), *looping, *pace, self.fps);
                source.open().await?;
                tracing::info!(source = %spec, looping = *looping, "File source opened");
                Ok(Box::new(source))
            }
            _ => Err(SourceError::Unsupported(format!(
                "{} source needs a peer media session",
                spec
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory readers shared by source tests

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    /// Scripted reader step
    #[derive(Debug, Clone)]
    pub enum Step {
        Image(u8),
        Fail,
        End,
    }

    pub struct ScriptedReader {
        steps: VecDeque<Step>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FrameReader for ScriptedReader {
        async fn read_frame(&mut self) -> Result<Option<RawImage>, SourceError> {
            // Let other tasks run, as a real capture read would
            tokio::task::yield_now().await;
            match self.steps.pop_front() {
                Some(Step::Image(fill)) => Ok(Some(RawImage::rgb(vec![fill; 2 * 2 * 3], 2, 2))),
                Some(Step::Fail) => Err(SourceError::read("scripted", "injected failure")),
                Some(Step::End) | None => Ok(None),
            }
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Hands out one script per `open`; `None` scripts fail to open
    pub struct ScriptedFactory {
        scripts: Mutex<VecDeque<Option<Vec<Step>>>>,
        pub opens: Arc<AtomicUsize>,
        pub closes: Arc<AtomicUsize>,
    }

    impl ScriptedFactory {
        pub fn new(scripts: Vec<Option<Vec<Step>>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                opens: Arc::new(AtomicUsize::new(0)),
                closes: Arc::new(AtomicUsize::new(0)),
            }
        }

        /// The same script for every open
        pub fn repeating(steps: Vec<Step>, times: usize) -> Self {
            Self::new(vec![Some(steps); times])
        }
    }

    /// Opener whose devices stream `frames` images per open and whose files are empty
    pub struct ScriptedOpener {
        pub frames: usize,
    }

    impl ReaderOpener for ScriptedOpener {
        fn file(&self, _path: &std::path::Path) -> Arc<dyn ReaderFactory> {
            Arc::new(ScriptedFactory::repeating(vec![Step::End], 4))
        }

        fn device(&self, _device: &DeviceSpec) -> Arc<dyn ReaderFactory> {
            Arc::new(ScriptedFactory::repeating(vec![Step::Image(9); self.frames], 4))
        }
    }

    #[async_trait]
    impl ReaderFactory for ScriptedFactory {
        fn label(&self) -> String {
            "scripted".to_string()
        }

        async fn open(&self) -> Result<Box<dyn FrameReader>, SourceError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            match self.scripts.lock().pop_front() {
                Some(Some(steps)) => Ok(Box::new(ScriptedReader {
                    steps: steps.into(),
                    closed: Arc::clone(&self.closes),
                })),
                _ => Err(SourceError::open("scripted", "no such device")),
            }
        }
    }
}
