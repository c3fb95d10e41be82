//! Session state machine
//!
//! Tracks a viewer session from its first pull to teardown.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// Pulling, annotating and delivering frames
    Running,
    /// Loop has stopped; resources are being released
    Draining,
    /// All resources released
    Closed,
}

impl SessionPhase {
    fn to_u8(self) -> u8 {
        match self {
            SessionPhase::Running => 0,
            SessionPhase::Draining => 1,
            SessionPhase::Closed => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionPhase::Running,
            1 => SessionPhase::Draining,
            _ => SessionPhase::Closed,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Running => write!(f, "running"),
            SessionPhase::Draining => write!(f, "draining"),
            SessionPhase::Closed => write!(f, "closed"),
        }
    }
}

/// Phase shared between the session loop (sole writer) and the registry
#[derive(Debug, Clone)]
pub struct PhaseCell(Arc<AtomicU8>);

impl PhaseCell {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(SessionPhase::Running.to_u8())))
    }

    pub fn get(&self) -> SessionPhase {
        SessionPhase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Advance the phase; phases never move backwards
    pub fn advance(&self, phase: SessionPhase) {
        self.0.fetch_max(phase.to_u8(), Ordering::AcqRel);
    }
}

impl Default for PhaseCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a session loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The source ran out of frames
    EndOfStream,
    /// The source failed and could not recover
    SourceFailed(String),
    /// The annotation capability failed
    AnnotationFailed(String),
    /// The viewer went away or the transport failed
    SinkClosed,
    /// Cancelled by the server (shutdown or explicit close)
    Cancelled,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::EndOfStream => write!(f, "end of stream"),
            CloseReason::SourceFailed(reason) => write!(f, "source failed: {}", reason),
            CloseReason::AnnotationFailed(reason) => write!(f, "annotation failed: {}", reason),
            CloseReason::SinkClosed => write!(f, "viewer closed"),
            CloseReason::Cancelled => write!(f, "cancelled"),
        }
    }
}
