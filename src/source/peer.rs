//! Frames from the viewer's own media track

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use super::FrameSource;
use crate::error::SourceError;
use crate::media::Frame;
use crate::session::CancelToken;
use crate::sink::PeerState;

/// Suspending source fed by the peer track reader task
///
/// `next_frame` waits on the channel without blocking a thread and returns
/// end of stream when the track ends, the peer connection goes away or the
/// session is cancelled. A viewer that never sends video is still noticed
/// through the connection state.
pub struct PeerTrackSource {
    label: String,
    rx: mpsc::Receiver<Frame>,
    cancel: CancelToken,
    state: Option<watch::Receiver<PeerState>>,
}

impl PeerTrackSource {
    pub fn new(label: impl Into<String>, rx: mpsc::Receiver<Frame>, cancel: CancelToken) -> Self {
        Self {
            label: label.into(),
            rx,
            cancel,
            state: None,
        }
    }

    /// End the stream once the peer connection reaches a terminal state
    pub fn peer_state(mut self, state: watch::Receiver<PeerState>) -> Self {
        self.state = Some(state);
        self
    }
}

/// Resolves when the connection can no longer deliver media
async fn peer_gone(state: &mut Option<watch::Receiver<PeerState>>) {
    match state {
        // A dropped sender means the connection itself is gone
        Some(state) => {
            let _ = state.wait_for(|s| s.is_terminal()).await;
        }
        None => std::future::pending().await,
    }
}

#[async_trait]
impl FrameSource for PeerTrackSource {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let Self {
            label,
            rx,
            cancel,
            state,
        } = self;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            _ = peer_gone(state) => {
                tracing::debug!(source = %label, "Peer gone, inbound track ended");
                Ok(None)
            }
            frame = rx.recv() => Ok(frame),
        }
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::media::PixelFormat;

    fn frame(sequence: u64) -> Frame {
        Frame::new(
            Bytes::from_static(&[0, 0, 0]),
            1,
            1,
            PixelFormat::Rgb24,
            sequence,
            Duration::from_millis(sequence * 33),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_yields_frames_then_ends_with_track() {
        let (tx, rx) = mpsc::channel(4);
        let mut source = PeerTrackSource::new("peer:1", rx, CancelToken::new());

        tx.send(frame(0)).await.unwrap();
        tx.send(frame(1)).await.unwrap();
        drop(tx);

        assert_eq!(source.next_frame().await.unwrap().unwrap().sequence, 0);
        assert_eq!(source.next_frame().await.unwrap().unwrap().sequence, 1);
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_terminal_peer_state_ends_silent_track() {
        // The sender stays alive, as it does inside a live connection
        let (_tx, rx) = mpsc::channel::<Frame>(4);
        let (state_tx, state_rx) = watch::channel(PeerState::Connected);
        let mut source = PeerTrackSource::new("peer:3", rx, CancelToken::new()).peer_state(state_rx);

        let waiter = tokio::spawn(async move { source.next_frame().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        state_tx.send_replace(PeerState::Connecting);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        state_tx.send_replace(PeerState::Disconnected);
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_wakes_pending_pull() {
        let (_tx, rx) = mpsc::channel::<Frame>(4);
        let cancel = CancelToken::new();
        let mut source = PeerTrackSource::new("peer:2", rx, cancel.clone());

        let waiter = tokio::spawn(async move { source.next_frame().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.unwrap().is_none());
    }
}
