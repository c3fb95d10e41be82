//! Video codecs for the peer media transport
//!
//! Peer media carries compressed video, so sessions on that transport need a
//! [`VideoEncoder`] (outbound) and, when the viewer's own camera is the
//! source, a [`VideoDecoder`] (inbound). Codecs are handed out by a
//! [`CodecProvider`] so tests and embedders can swap them.
//!
//! H.264 via OpenH264 is compiled in with the `h264` feature. Without it the
//! default provider refuses to create codecs and peer media negotiation fails
//! with a clear error while MJPEG and socket delivery keep working.

use bytes::Bytes;

use super::frame::Frame;
use crate::error::{SignalingError, SinkError, SourceError};

/// MIME type of H.264 tracks
pub const MIME_TYPE_H264: &str = "video/H264";

/// Encodes annotated frames into a compressed bitstream
pub trait VideoEncoder: Send {
    /// Encode one frame; an empty result means the encoder skipped it
    fn encode(&mut self, frame: &Frame) -> Result<Bytes, SinkError>;
}

/// A decoded picture (packed RGB)
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// Decodes an inbound bitstream into pictures
pub trait VideoDecoder: Send {
    /// Feed one access unit; returns a picture once one is complete
    fn decode(&mut self, payload: &[u8]) -> Result<Option<DecodedImage>, SourceError>;
}

/// Factory for per-session codecs
pub trait CodecProvider: Send + Sync {
    /// MIME type negotiated for the outbound track
    fn mime_type(&self) -> &'static str;

    /// Create an encoder for one session
    fn encoder(&self, width: u32, height: u32, fps: u32)
        -> Result<Box<dyn VideoEncoder>, SignalingError>;

    /// Create a decoder for an inbound track
    fn decoder(&self) -> Result<Box<dyn VideoDecoder>, SignalingError>;
}

/// Provider used by the server
pub fn default_codecs() -> Box<dyn CodecProvider> {
    Box::new(H264Codecs)
}

/// H.264 codecs (OpenH264)
#[derive(Debug, Clone, Copy, Default)]
pub struct H264Codecs;

#[cfg(not(feature = "h264"))]
impl CodecProvider for H264Codecs {
    fn mime_type(&self) -> &'static str {
        MIME_TYPE_H264
    }

    fn encoder(
        &self,
        _width: u32,
        _height: u32,
        _fps: u32,
    ) -> Result<Box<dyn VideoEncoder>, SignalingError> {
        Err(SignalingError::Codec(
            "H.264 encoding requires the 'h264' feature flag".to_string(),
        ))
    }

    fn decoder(&self) -> Result<Box<dyn VideoDecoder>, SignalingError> {
        Err(SignalingError::Codec(
            "H.264 decoding requires the 'h264' feature flag".to_string(),
        ))
    }
}

#[cfg(feature = "h264")]
impl CodecProvider for H264Codecs {
    fn mime_type(&self) -> &'static str {
        MIME_TYPE_H264
    }

    fn encoder(
        &self,
        _width: u32,
        _height: u32,
        _fps: u32,
    ) -> Result<Box<dyn VideoEncoder>, SignalingError> {
        let inner = openh264::encoder::Encoder::new()
            .map_err(|e| SignalingError::Codec(e.to_string()))?;
        Ok(Box::new(h264::Encoder { inner }))
    }

    fn decoder(&self) -> Result<Box<dyn VideoDecoder>, SignalingError> {
        let inner = openh264::decoder::Decoder::new()
            .map_err(|e| SignalingError::Codec(e.to_string()))?;
        Ok(Box::new(h264::Decoder { inner }))
    }
}

#[cfg(feature = "h264")]
mod h264 {
    use bytes::Bytes;
    use openh264::formats::YUVBuffer;

    use super::{DecodedImage, VideoDecoder, VideoEncoder};
    use crate::error::{SinkError, SourceError};
    use crate::media::frame::Frame;

    pub(super) struct Encoder {
        pub(super) inner: openh264::encoder::Encoder,
    }

    impl VideoEncoder for Encoder {
        fn encode(&mut self, frame: &Frame) -> Result<Bytes, SinkError> {
            let rgb = frame.to_rgb();
            let yuv = YUVBuffer::with_rgb(frame.width as usize, frame.height as usize, &rgb);
            let bitstream = self
                .inner
                .encode(&yuv)
                .map_err(|e| SinkError::Encode(e.to_string()))?;
            Ok(Bytes::from(bitstream.to_vec()))
        }
    }

    pub(super) struct Decoder {
        pub(super) inner: openh264::decoder::Decoder,
    }

    impl VideoDecoder for Decoder {
        fn decode(&mut self, payload: &[u8]) -> Result<Option<DecodedImage>, SourceError> {
            let decoded = self
                .inner
                .decode(payload)
                .map_err(|e| SourceError::read("peer track", e))?;

            Ok(decoded.map(|yuv| {
                let (width, height) = yuv.dimensions();
                let mut rgb = vec![0u8; width * height * 3];
                yuv.write_rgb8(&mut rgb);
                DecodedImage {
                    width: width as u32,
                    height: height as u32,
                    rgb,
                }
            }))
        }
    }
}
