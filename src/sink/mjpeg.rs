//! MJPEG over HTTP multipart
//!
//! Each frame is written as one part of a `multipart/x-mixed-replace`
//! response. Browsers render it natively in an `<img>` element.
//!
//! The sink pushes encoded parts into a bounded channel whose receiver is the
//! response body, so a slow viewer slows its own session down instead of
//! buffering without limit. When the viewer disconnects the body is dropped
//! and the next delivery reports `Closed`.

use std::convert::Infallible;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::{BufMut, Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{Delivery, FrameSink, TransportKind};
use crate::media::{AnnotatedFrame, ImageEncoder};

/// Multipart boundary between frames
pub const MJPEG_BOUNDARY: &str = "frame";

/// Response content type
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Wrap one JPEG image as a multipart chunk
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", MJPEG_BOUNDARY);
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Create a connected sink and response body
pub fn channel(capacity: usize, encoder: ImageEncoder) -> (MjpegSink, MjpegStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        MjpegSink {
            tx,
            encoder,
            closed: false,
        },
        MjpegStream { rx },
    )
}

/// Sink half: encodes frames and queues multipart chunks
pub struct MjpegSink {
    tx: mpsc::Sender<Bytes>,
    encoder: ImageEncoder,
    closed: bool,
}

#[async_trait]
impl FrameSink for MjpegSink {
    fn kind(&self) -> TransportKind {
        TransportKind::Mjpeg
    }

    async fn deliver(&mut self, frame: &AnnotatedFrame) -> Delivery {
        if self.closed || self.tx.is_closed() {
            self.closed = true;
            return Delivery::Closed;
        }

        let jpeg = match self.encoder.encode_blocking(&frame.frame).await {
            Ok(jpeg) => jpeg,
            Err(e) => {
                tracing::debug!(sequence = frame.frame.sequence, error = %e, "MJPEG encode failed, frame dropped");
                return Delivery::Dropped;
            }
        };

        if self.tx.send(mjpeg_part(&jpeg)).await.is_err() {
            self.closed = true;
            return Delivery::Closed;
        }

        Delivery::Sent
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

/// Body half: the multipart chunks for the HTTP response
pub struct MjpegStream {
    rx: mpsc::Receiver<Bytes>,
}

impl MjpegStream {
    /// Streaming body that ends when the sink is dropped
    pub fn into_body(self) -> Body {
        Body::from_stream(ReceiverStream::new(self.rx).map(Ok::<_, Infallible>))
    }
}

impl IntoResponse for MjpegStream {
    fn into_response(self) -> Response {
        (
            [
                (header::CONTENT_TYPE, MJPEG_CONTENT_TYPE),
                (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
                (header::PRAGMA, "no-cache"),
            ],
            self.into_body(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::media::{Frame, PixelFormat};

    fn annotated() -> AnnotatedFrame {
        let frame = Frame::new(
            Bytes::from(vec![200u8; PixelFormat::Rgb24.frame_size(16, 16)]),
            16,
            16,
            PixelFormat::Rgb24,
            0,
            Duration::ZERO,
        )
        .unwrap();
        AnnotatedFrame { frame, fps: 0.0 }
    }

    #[test]
    fn test_part_layout() {
        let part = mjpeg_part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let expected: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8\xFF\xD9\r\n";
        assert_eq!(&part[..], expected);
    }

    #[tokio::test]
    async fn test_deliver_writes_part() {
        let (mut sink, stream) = channel(2, ImageEncoder::default());
        let mut rx = stream.rx;

        assert_eq!(sink.deliver(&annotated()).await, Delivery::Sent);

        let part = rx.recv().await.unwrap();
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8"));
        assert!(part.ends_with(b"\xFF\xD9\r\n"));
        assert_eq!(sink.kind(), TransportKind::Mjpeg);
    }

    #[tokio::test]
    async fn test_dropped_viewer_closes_permanently() {
        let (mut sink, stream) = channel(2, ImageEncoder::default());
        drop(stream);

        assert_eq!(sink.deliver(&annotated()).await, Delivery::Closed);
        assert_eq!(sink.deliver(&annotated()).await, Delivery::Closed);
    }

    #[test]
    fn test_response_headers() {
        let (_sink, stream) = channel(1, ImageEncoder::default());
        let response = stream.into_response();

        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            MJPEG_CONTENT_TYPE
        );
    }
}
