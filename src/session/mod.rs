//! Viewer sessions
//!
//! A session binds one source, one annotator adapter and one sink, and runs
//! a single loop for every transport:
//!
//! ```text
//!   ┌──────── cancel? ◄──────────────────────────────┐
//!   ▼                                                 │
//!  pull (raced with cancel) ─► order check ─► annotate ─► cancel? ─► deliver
//!   │ None / error                 │ late                │ yes        │ Closed
//!   ▼                              ▼ (count, skip)       ▼            ▼
//!  EndOfStream / SourceFailed                         Draining     SinkClosed
//! ```
//!
//! Whatever ends the loop, teardown is the same: close the source, close the
//! sink, mark the session `Closed` and drop the registry guard.

pub mod cancel;
pub mod launcher;
pub mod state;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::annotate::AnnotatorAdapter;
use crate::registry::{RegistryGuard, SessionId};
use crate::sink::{Delivery, FrameSink};
use crate::source::FrameSource;
use crate::stats::{SessionCounters, SessionStats};

pub use cancel::CancelToken;
pub use launcher::SessionLauncher;
pub use state::{CloseReason, PhaseCell, SessionPhase};

/// How a session ended
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub id: SessionId,
    pub reason: CloseReason,
    pub stats: SessionStats,
}

/// One viewer session
pub struct Session {
    guard: RegistryGuard,
    source: Box<dyn FrameSource>,
    annotator: AnnotatorAdapter,
    sink: Box<dyn FrameSink>,
}

impl Session {
    /// Create a session from an opened source and a connected sink
    pub fn new(
        guard: RegistryGuard,
        source: Box<dyn FrameSource>,
        annotator: AnnotatorAdapter,
        sink: Box<dyn FrameSink>,
    ) -> Self {
        Self {
            guard,
            source,
            annotator,
            sink,
        }
    }

    /// The registry id
    pub fn id(&self) -> SessionId {
        self.guard.id()
    }

    /// Run the loop on its own task
    pub fn spawn(self) -> JoinHandle<SessionOutcome> {
        tokio::spawn(self.run())
    }

    /// Run until the source ends, the viewer leaves or the session is cancelled
    pub async fn run(mut self) -> SessionOutcome {
        let id = self.guard.id();
        let cancel = self.guard.cancel_token();
        let phase = self.guard.phase();
        let counters = self.guard.counters();
        let started = Instant::now();
        let source_label = self.source.label();

        tracing::info!(
            session_id = id,
            source = %source_label,
            transport = %self.sink.kind(),
            "Session started"
        );

        let reason = self.drive(&cancel, &phase, &counters).await;

        phase.advance(SessionPhase::Draining);
        self.source.close().await;
        self.sink.close().await;
        phase.advance(SessionPhase::Closed);

        let stats = counters.snapshot(started.elapsed());
        match &reason {
            CloseReason::SourceFailed(_) | CloseReason::AnnotationFailed(_) => tracing::warn!(
                session_id = id,
                source = %source_label,
                reason = %reason,
                frames = stats.frames_delivered,
                "Session closed"
            ),
            _ => tracing::info!(
                session_id = id,
                source = %source_label,
                reason = %reason,
                frames = stats.frames_delivered,
                dropped = stats.frames_dropped,
                "Session closed"
            ),
        }

        SessionOutcome { id, reason, stats }
    }

    async fn drive(
        &mut self,
        cancel: &CancelToken,
        phase: &PhaseCell,
        counters: &Arc<SessionCounters>,
    ) -> CloseReason {
        let id = self.guard.id();
        let mut last_timestamp: Option<Duration> = None;

        loop {
            if cancel.is_cancelled() {
                return CloseReason::Cancelled;
            }

            let pulled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return CloseReason::Cancelled,
                pulled = self.source.next_frame() => pulled,
            };

            let frame = match pulled {
                Ok(Some(frame)) => frame,
                Ok(None) => return CloseReason::EndOfStream,
                Err(e) => return CloseReason::SourceFailed(e.to_string()),
            };
            counters.record_pulled();

            if last_timestamp.is_some_and(|last| frame.timestamp < last) {
                tracing::debug!(
                    session_id = id,
                    sequence = frame.sequence,
                    "Out-of-order frame dropped"
                );
                counters.record_reordered();
                continue;
            }
            last_timestamp = Some(frame.timestamp);

            let annotated = match self.annotator.annotate(frame).await {
                Ok(annotated) => annotated,
                Err(e) => return CloseReason::AnnotationFailed(e.to_string()),
            };

            if cancel.is_cancelled() {
                // The frame in flight is discarded
                phase.advance(SessionPhase::Draining);
                return CloseReason::Cancelled;
            }

            match self.sink.deliver(&annotated).await {
                Delivery::Sent => counters.record_delivered(annotated.fps),
                Delivery::Dropped => counters.record_dropped(),
                Delivery::Closed => return CloseReason::SinkClosed,
            }
        }
    }
}
