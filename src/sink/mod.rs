//! Transport sinks
//!
//! Every transport implements [`FrameSink`], so a single session loop drives
//! all of them:
//!
//! - [`MjpegSink`]: multipart JPEG chunks on a long-lived HTTP body
//! - [`SocketSink`]: one binary WebSocket message per frame
//! - [`PeerMediaSink`]: timestamped samples on a negotiated media track

pub mod mjpeg;
pub mod peer;
pub mod socket;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::media::AnnotatedFrame;

pub use mjpeg::{MjpegSink, MjpegStream, MJPEG_CONTENT_TYPE};
pub use peer::{PeerMediaSink, PeerState, SampleWriter};
pub use socket::{watch_disconnect, SocketSink};

/// Which transport a session delivers over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Mjpeg,
    Socket,
    Peer,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Mjpeg => write!(f, "mjpeg"),
            TransportKind::Socket => write!(f, "socket"),
            TransportKind::Peer => write!(f, "peer"),
        }
    }
}

/// Outcome of delivering one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The frame was handed to the transport
    Sent,
    /// This frame was discarded; the session continues
    Dropped,
    /// The viewer is gone; the session must stop
    Closed,
}

/// Delivery endpoint for one session
#[async_trait]
pub trait FrameSink: Send {
    /// Transport this sink writes to
    fn kind(&self) -> TransportKind;

    /// Deliver one annotated frame
    ///
    /// Once `Closed` has been returned every later call returns `Closed`.
    async fn deliver(&mut self, frame: &AnnotatedFrame) -> Delivery;

    /// Release the transport; idempotent
    async fn close(&mut self);
}
