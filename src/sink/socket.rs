//! WebSocket frame delivery
//!
//! One binary message per frame, each a complete still image. The read half
//! of the socket is only watched for the viewer going away; anything the
//! viewer sends is ignored.

use std::fmt;

use async_trait::async_trait;
use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::task::JoinHandle;

use super::{Delivery, FrameSink, TransportKind};
use crate::media::{AnnotatedFrame, ImageEncoder};
use crate::session::CancelToken;

/// Spawn a task that cancels the returned token once the viewer disconnects
///
/// A close message, a read error and the end of the stream all count.
pub fn watch_disconnect<R, E>(mut inbound: R) -> (CancelToken, JoinHandle<()>)
where
    R: Stream<Item = Result<Message, E>> + Send + Unpin + 'static,
    E: fmt::Display + Send,
{
    let gone = CancelToken::new();
    let flag = gone.clone();

    let handle = tokio::spawn(async move {
        while let Some(message) = inbound.next().await {
            match message {
                Ok(Message::Close(_)) => {
                    tracing::debug!("Viewer sent close");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "Viewer socket read failed");
                    break;
                }
            }
        }
        flag.cancel();
    });

    (gone, handle)
}

/// Sends each frame as a binary WebSocket message
pub struct SocketSink<S> {
    outbound: S,
    encoder: ImageEncoder,
    gone: CancelToken,
    watcher: Option<JoinHandle<()>>,
    closed: bool,
}

impl<S> SocketSink<S>
where
    S: Sink<Message> + Send + Unpin,
    S::Error: fmt::Display,
{
    /// Create a sink over the write half; `gone` is cancelled when the viewer leaves
    pub fn new(outbound: S, encoder: ImageEncoder, gone: CancelToken) -> Self {
        Self {
            outbound,
            encoder,
            gone,
            watcher: None,
            closed: false,
        }
    }

    /// Tie the disconnect watcher's lifetime to this sink
    pub fn with_watcher(mut self, watcher: JoinHandle<()>) -> Self {
        self.watcher = Some(watcher);
        self
    }
}

#[async_trait]
impl<S> FrameSink for SocketSink<S>
where
    S: Sink<Message> + Send + Unpin,
    S::Error: fmt::Display,
{
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn deliver(&mut self, frame: &AnnotatedFrame) -> Delivery {
        if self.closed || self.gone.is_cancelled() {
            self.closed = true;
            return Delivery::Closed;
        }

        let image = match self.encoder.encode_blocking(&frame.frame).await {
            Ok(image) => image,
            Err(e) => {
                tracing::debug!(sequence = frame.frame.sequence, error = %e, "Socket encode failed, frame dropped");
                return Delivery::Dropped;
            }
        };

        if let Err(e) = self.outbound.send(Message::Binary(image.to_vec())).await {
            tracing::debug!(error = %e, "Socket write failed");
            self.closed = true;
            return Delivery::Closed;
        }

        Delivery::Sent
    }

    async fn close(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        if !self.gone.is_cancelled() {
            // Best effort; the viewer may be gone by now
            let _ = self.outbound.close().await;
        }
        self.closed = true;
    }
}
