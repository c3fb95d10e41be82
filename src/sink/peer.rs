//! Peer media track delivery
//!
//! ```text
//!   session loop ──deliver──► slot (latest frame only) ──► writer task
//!                                                           │ encode
//!                                                           ▼
//!                                                     SampleWriter (track)
//! ```
//!
//! The session never waits for the encoder or the network: delivering a
//! frame only replaces whatever is still waiting in the slot. The writer
//! task drains the slot, encodes and writes one sample per frame. Sample
//! timestamps come from the source timeline, not the wall clock, so a
//! stalled encoder does not stretch playback on the viewer side.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::{Delivery, FrameSink, TransportKind};
use crate::error::SinkError;
use crate::media::{AnnotatedFrame, VideoEncoder};
use crate::session::CancelToken;
use crate::stats::SessionCounters;

/// Connection state of a negotiated peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    /// Whether the peer can no longer receive media
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PeerState::Disconnected | PeerState::Failed | PeerState::Closed
        )
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerState::New => "new",
            PeerState::Connecting => "connecting",
            PeerState::Connected => "connected",
            PeerState::Disconnected => "disconnected",
            PeerState::Failed => "failed",
            PeerState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Destination for encoded media samples
#[async_trait]
pub trait SampleWriter: Send + Sync {
    async fn write_sample(&self, sample: &Sample) -> Result<(), SinkError>;
}

#[async_trait]
impl SampleWriter for TrackLocalStaticSample {
    async fn write_sample(&self, sample: &Sample) -> Result<(), SinkError> {
        TrackLocalStaticSample::write_sample(self, sample)
            .await
            .map_err(|e| SinkError::Write(e.to_string()))
    }
}

struct Shared {
    slot: Mutex<Option<AnnotatedFrame>>,
    wake: Notify,
    stop: CancelToken,
    failed: CancelToken,
    superseded: AtomicU64,
}

/// Delivers frames to a peer media track
pub struct PeerMediaSink {
    shared: Arc<Shared>,
    state: watch::Receiver<PeerState>,
    writer: Option<JoinHandle<()>>,
    on_close: Option<BoxFuture<'static, ()>>,
    counters: Option<Arc<SessionCounters>>,
    closed: bool,
}

impl PeerMediaSink {
    /// Start the writer task
    ///
    /// `frame_interval` is the duration given to the first sample, before
    /// two source timestamps are known.
    pub fn new(
        writer: Arc<dyn SampleWriter>,
        encoder: Box<dyn VideoEncoder>,
        state: watch::Receiver<PeerState>,
        frame_interval: Duration,
    ) -> Self {
        let shared = Arc::new(Shared {
            slot: Mutex::new(None),
            wake: Notify::new(),
            stop: CancelToken::new(),
            failed: CancelToken::new(),
            superseded: AtomicU64::new(0),
        });

        let task = tokio::spawn(write_loop(
            Arc::clone(&shared),
            writer,
            encoder,
            frame_interval,
        ));

        Self {
            shared,
            state,
            writer: Some(task),
            on_close: None,
            counters: None,
            closed: false,
        }
    }

    /// Run `closer` when the sink closes, e.g. to tear down the connection
    pub fn on_close(mut self, closer: BoxFuture<'static, ()>) -> Self {
        self.on_close = Some(closer);
        self
    }

    /// Count superseded frames as dropped on the session's counters
    pub fn counters(mut self, counters: Arc<SessionCounters>) -> Self {
        self.counters = Some(counters);
        self
    }

    /// Frames replaced in the slot before the writer reached them
    pub fn superseded(&self) -> u64 {
        self.shared.superseded.load(Ordering::Relaxed)
    }

    fn peer_gone(&self) -> bool {
        self.shared.failed.is_cancelled() || self.state.borrow().is_terminal()
    }
}

async fn write_loop(
    shared: Arc<Shared>,
    writer: Arc<dyn SampleWriter>,
    mut encoder: Box<dyn VideoEncoder>,
    frame_interval: Duration,
) {
    let epoch = SystemTime::now();
    let mut previous: Option<Duration> = None;

    loop {
        tokio::select! {
            biased;
            _ = shared.stop.cancelled() => break,
            _ = shared.wake.notified() => {}
        }

        let Some(frame) = shared.slot.lock().take() else {
            continue;
        };
        let ts = frame.timestamp();

        let (returned, encoded) = match tokio::task::spawn_blocking(move || {
            let encoded = encoder.encode(&frame.frame);
            (encoder, encoded)
        })
        .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "Peer encoder task failed");
                shared.failed.cancel();
                break;
            }
        };
        encoder = returned;

        let data = match encoded {
            Ok(data) if data.is_empty() => continue,
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(error = %e, "Peer encode failed, frame dropped");
                continue;
            }
        };

        let duration = match previous {
            Some(prev) => ts.saturating_sub(prev),
            None => frame_interval,
        };
        previous = Some(ts);

        let sample = Sample {
            data,
            timestamp: epoch + ts,
            duration,
            ..Default::default()
        };

        if let Err(e) = writer.write_sample(&sample).await {
            tracing::debug!(error = %e, "Peer sample write failed");
            shared.failed.cancel();
            break;
        }
    }
}

#[async_trait]
impl FrameSink for PeerMediaSink {
    fn kind(&self) -> TransportKind {
        TransportKind::Peer
    }

    async fn deliver(&mut self, frame: &AnnotatedFrame) -> Delivery {
        if self.closed || self.peer_gone() {
            self.closed = true;
            return Delivery::Closed;
        }

        let replaced = self.shared.slot.lock().replace(frame.clone());
        if replaced.is_some() {
            self.shared.superseded.fetch_add(1, Ordering::Relaxed);
            if let Some(counters) = &self.counters {
                counters.record_dropped();
            }
        }
        self.shared.wake.notify_one();

        Delivery::Sent
    }

    async fn close(&mut self) {
        self.closed = true;
        self.shared.stop.cancel();

        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        if let Some(closer) = self.on_close.take() {
            closer.await;
        }

        tracing::debug!(superseded = self.superseded(), "Peer sink closed");
    }
}
