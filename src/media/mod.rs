//! Media handling
//!
//! This module provides:
//! - Raw frame representation
//! - JPEG/WebP still-image encoding for MJPEG and socket delivery
//! - The fixed FPS text overlay
//! - Video encoder/decoder seams for peer media

pub mod codec;
pub mod encode;
pub mod frame;
pub mod overlay;

pub use codec::{default_codecs, CodecProvider, DecodedImage, VideoDecoder, VideoEncoder};
pub use encode::{ImageCodec, ImageEncoder};
pub use frame::{AnnotatedFrame, Frame, PixelFormat};
pub use overlay::OverlayStyle;
