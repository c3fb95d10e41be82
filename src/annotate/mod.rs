//! Frame annotation
//!
//! The annotation capability (object detection, segmentation, ...) is an
//! opaque [`Annotate`] implementation supplied by the embedder. The core only
//! relies on its contract: one frame in, one frame of the same geometry out,
//! synchronously.
//!
//! [`AnnotatorAdapter`] is the per-session wrapper that runs the capability
//! on the shared [`AnnotationQueue`], measures the session's frame rate and
//! draws the `FPS: n.n` overlay.

pub mod fps;
pub mod queue;

use crate::error::AnnotateError;
use crate::media::overlay::{self, OverlayStyle};
use crate::media::{AnnotatedFrame, Frame};

pub use fps::{FpsCounter, FPS_EPSILON};
pub use queue::AnnotationQueue;

/// External annotation capability
pub trait Annotate: Send + Sync {
    /// Annotate one frame, returning a frame of the same geometry
    fn annotate(&self, frame: &Frame) -> Result<Frame, AnnotateError>;

    /// Name used in logs
    fn name(&self) -> &str;
}

/// Returns frames unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Annotate for Passthrough {
    fn annotate(&self, frame: &Frame) -> Result<Frame, AnnotateError> {
        Ok(frame.clone())
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

/// Per-session annotation state
pub struct AnnotatorAdapter {
    queue: AnnotationQueue,
    fps: FpsCounter,
    overlay: OverlayStyle,
}

impl AnnotatorAdapter {
    pub fn new(queue: AnnotationQueue, overlay: OverlayStyle) -> Self {
        Self {
            queue,
            fps: FpsCounter::new(),
            overlay,
        }
    }

    /// Annotate a frame and draw the frame-rate overlay
    pub async fn annotate(&mut self, frame: Frame) -> Result<AnnotatedFrame, AnnotateError> {
        let annotated = self.queue.annotate(frame).await?;
        let fps = self.fps.tick();
        let frame = overlay::draw_fps(&annotated, fps, &self.overlay);

        Ok(AnnotatedFrame { frame, fps })
    }

    /// Frame rate reported on the last annotated frame
    pub fn fps(&self) -> f64 {
        self.fps.current()
    }
}
