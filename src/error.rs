//! Error types
//!
//! Every failure is scoped to one session. The nested enums map onto the
//! failure taxonomy of the delivery core:
//!
//! - [`SourceError`]: a frame source could not be opened or stopped producing
//! - [`AnnotateError`]: the external annotation capability failed
//! - [`SinkError`]: a frame could not be encoded or written to the viewer
//! - [`SignalingError`]: a peer media offer could not be negotiated
//! - [`BatchError`]: an uploaded image or video could not be annotated
//!
//! End of stream is not an error; sources report it as `Ok(None)`.

use std::io;

use thiserror::Error;

use crate::registry::RegistryError;

/// Result type for framecast operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Frame source failure
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Annotation failure
    #[error("annotation error: {0}")]
    Annotate(#[from] AnnotateError),

    /// Delivery failure
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Signaling failure
    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),

    /// Session registry rejected an operation
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Batch annotation failure
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    /// Invalid configuration
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Frame source errors
#[derive(Debug, Error)]
pub enum SourceError {
    /// The device or file could not be opened (fatal to the session attempt)
    #[error("failed to open {source_label}: {reason}")]
    Open { source_label: String, reason: String },

    /// A mid-stream read failed and the source could not recover
    #[error("read from {source_label} failed: {reason}")]
    Read { source_label: String, reason: String },

    /// The device is held exclusively by another session
    #[error("device busy: {0}")]
    Busy(String),

    /// The requested source kind is not available in this build
    #[error("unsupported source: {0}")]
    Unsupported(String),

    /// A raw frame did not match its declared geometry
    #[error("invalid frame: expected {expected} bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
}

impl SourceError {
    /// Create an open error
    pub fn open(label: impl Into<String>, reason: impl ToString) -> Self {
        SourceError::Open {
            source_label: label.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a read error
    pub fn read(label: impl Into<String>, reason: impl ToString) -> Self {
        SourceError::Read {
            source_label: label.into(),
            reason: reason.to_string(),
        }
    }
}

/// Annotation capability errors
#[derive(Debug, Error)]
pub enum AnnotateError {
    /// The annotator itself reported a failure
    #[error("annotator {annotator} failed: {reason}")]
    Failed { annotator: String, reason: String },

    /// The annotator returned a frame with a different geometry
    #[error("annotator returned {got_width}x{got_height}, expected {width}x{height}")]
    GeometryMismatch {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },

    /// The annotation worker pool is gone
    #[error("annotation queue closed")]
    QueueClosed,
}

/// Transport sink errors
#[derive(Debug, Error)]
pub enum SinkError {
    /// The frame could not be encoded (frame is dropped, session continues)
    #[error("encode failed: {0}")]
    Encode(String),

    /// The viewer is gone
    #[error("viewer disconnected")]
    Disconnected,

    /// The write to the viewer failed
    #[error("write failed: {0}")]
    Write(String),
}

/// Signaling (offer/answer) errors
#[derive(Debug, Error)]
pub enum SignalingError {
    /// The offer was malformed
    #[error("invalid offer: {0}")]
    InvalidOffer(String),

    /// The requested camera is not configured
    #[error("unknown camera: {0}")]
    UnknownCamera(String),

    /// The source for this session could not be acquired
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The session could not be registered
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The peer connection failed
    #[error("peer connection error: {0}")]
    Peer(String),

    /// No video codec is compiled in
    #[error("no video codec available: {0}")]
    Codec(String),
}

/// Batch (`/detect`) errors
#[derive(Debug, Error)]
pub enum BatchError {
    /// The upload could not be decoded
    #[error("cannot decode upload: {0}")]
    Decode(String),

    /// The result could not be encoded
    #[error("encoding failed: {0}")]
    Encode(String),

    /// The upload decoded to no frames
    #[error("upload contains no frames")]
    Empty,

    #[error(transparent)]
    Annotate(#[from] AnnotateError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read {path}: {source}")]
    Read { path: String, source: io::Error },

    /// File could not be parsed
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    /// A value is out of range
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
