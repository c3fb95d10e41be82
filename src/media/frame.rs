//! Raw video frames
//!
//! A [`Frame`] is one decoded image plus the timing information the session
//! needs to keep delivery in source order and the peer transport needs to
//! reproduce the input cadence.

use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// Pixel layouts carried through the pipeline
///
/// Both layouts are packed, 3 bytes per pixel, no row padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
}

impl PixelFormat {
    /// Bytes per pixel
    pub const fn bytes_per_pixel(self) -> usize {
        3
    }

    /// Size of a full frame in bytes
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

/// A decoded frame
///
/// Cheap to clone: the pixel data is reference counted, so relayed device
/// frames share one allocation between sessions until an annotator writes a
/// new buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Packed pixel data
    pub data: Bytes,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel layout
    pub format: PixelFormat,
    /// Position of this frame in its source (0-based, monotonic)
    pub sequence: u64,
    /// Media time since the source started
    pub timestamp: Duration,
    /// Wall-clock capture instant
    pub captured_at: Instant,
}

impl Frame {
    /// Create a frame, validating the buffer against the declared geometry
    pub fn new(
        data: Bytes,
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u64,
        timestamp: Duration,
    ) -> Result<Self, SourceError> {
        let expected = format.frame_size(width, height);
        if data.len() != expected {
            return Err(SourceError::InvalidFrame {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            data,
            width,
            height,
            format,
            sequence,
            timestamp,
            captured_at: Instant::now(),
        })
    }

    /// Replace the pixel data, keeping geometry and timing
    ///
    /// Used by annotators that draw into a copy of the input.
    pub fn with_data(&self, data: Bytes) -> Self {
        Self {
            data,
            ..self.clone()
        }
    }

    /// Pixel data as packed RGB, converting from BGR if needed
    pub fn to_rgb(&self) -> Vec<u8> {
        match self.format {
            PixelFormat::Rgb24 => self.data.to_vec(),
            PixelFormat::Bgr24 => {
                let mut out = self.data.to_vec();
                for px in out.chunks_exact_mut(3) {
                    px.swap(0, 2);
                }
                out
            }
        }
    }
}

/// A frame with its overlay drawn, ready for a sink
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    /// The annotated image (timing copied from the source frame)
    pub frame: Frame,
    /// Frames per second shown in the overlay (finite, >= 0)
    pub fps: f64,
}

impl AnnotatedFrame {
    /// Source timestamp of the underlying frame
    pub fn timestamp(&self) -> Duration {
        self.frame.timestamp
    }
}
