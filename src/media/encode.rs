//! Still-image encoding for the MJPEG and socket transports

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::ExtendedColorType;
use serde::{Deserialize, Serialize};

use super::frame::Frame;
use crate::error::SinkError;

/// Default JPEG quality (matches common webcam MJPEG output)
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Still-image codec used for a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageCodec {
    /// Baseline JPEG
    #[default]
    Jpeg,
    /// Lossless WebP
    Webp,
}

impl ImageCodec {
    /// MIME type of encoded output
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageCodec::Jpeg => "image/jpeg",
            ImageCodec::Webp => "image/webp",
        }
    }
}

/// Encodes frames into still images
#[derive(Debug, Clone, Copy)]
pub struct ImageEncoder {
    codec: ImageCodec,
    quality: u8,
}

impl ImageEncoder {
    /// Create an encoder; `quality` only applies to JPEG and is clamped to 1..=100
    pub fn new(codec: ImageCodec, quality: u8) -> Self {
        Self {
            codec,
            quality: quality.clamp(1, 100),
        }
    }

    /// JPEG encoder with the given quality
    pub fn jpeg(quality: u8) -> Self {
        Self::new(ImageCodec::Jpeg, quality)
    }

    /// The codec this encoder produces
    pub fn codec(&self) -> ImageCodec {
        self.codec
    }

    /// Encode one frame
    pub fn encode(&self, frame: &Frame) -> Result<Bytes, SinkError> {
        let rgb = frame.to_rgb();
        // Rough guess to avoid regrowing the buffer for typical 640x480 frames
        let mut out = Vec::with_capacity(rgb.len() / 8);

        match self.codec {
            ImageCodec::Jpeg => {
                let mut encoder = JpegEncoder::new_with_quality(&mut out, self.quality);
                encoder
                    .encode(&rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
                    .map_err(|e| SinkError::Encode(e.to_string()))?;
            }
            ImageCodec::Webp => {
                WebPEncoder::new_lossless(&mut out)
                    .encode(&rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
                    .map_err(|e| SinkError::Encode(e.to_string()))?;
            }
        }

        Ok(Bytes::from(out))
    }

    /// Encode on the blocking pool so the session task keeps its thread free
    pub async fn encode_blocking(&self, frame: &Frame) -> Result<Bytes, SinkError> {
        let encoder = *self;
        let frame = frame.clone();
        tokio::task::spawn_blocking(move || encoder.encode(&frame))
            .await
            .map_err(|e| SinkError::Encode(e.to_string()))?
    }
}

impl Default for ImageEncoder {
    fn default() -> Self {
        Self::jpeg(DEFAULT_JPEG_QUALITY)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::media::frame::PixelFormat;

    fn gray_frame(width: u32, height: u32) -> Frame {
        let data = vec![128u8; PixelFormat::Rgb24.frame_size(width, height)];
        Frame::new(
            Bytes::from(data),
            width,
            height,
            PixelFormat::Rgb24,
            0,
            Duration::ZERO,
        )
        .unwrap()
    }

    #[test]
    fn test_jpeg_markers() {
        let encoded = ImageEncoder::jpeg(75).encode(&gray_frame(16, 8)).unwrap();

        // SOI and EOI markers
        assert_eq!(&encoded[..2], &[0xFF, 0xD8]);
        assert_eq!(&encoded[encoded.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_webp_riff_header() {
        let encoder = ImageEncoder::new(ImageCodec::Webp, 0);
        let encoded = encoder.encode(&gray_frame(8, 8)).unwrap();

        assert_eq!(&encoded[..4], b"RIFF");
        assert_eq!(&encoded[8..12], b"WEBP");
    }

    #[test]
    fn test_jpeg_decodes_to_same_geometry() {
        let encoded = ImageEncoder::default().encode(&gray_frame(32, 24)).unwrap();
        let decoded = image::load_from_memory(&encoded).unwrap();

        assert_eq!(decoded.width(), 32);
        assert_eq!(decoded.height(), 24);
    }

    #[test]
    fn test_quality_clamped() {
        let encoder = ImageEncoder::new(ImageCodec::Jpeg, 0);
        assert_eq!(encoder.quality, 1);

        let encoder = ImageEncoder::new(ImageCodec::Jpeg, 255);
        assert_eq!(encoder.quality, 100);
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(ImageCodec::Jpeg.mime_type(), "image/jpeg");
        assert_eq!(ImageCodec::Webp.mime_type(), "image/webp");
    }
}
