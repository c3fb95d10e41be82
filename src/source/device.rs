//! Camera source with bounded retry and a single reopen
//!
//! Cameras fail transiently (momentarily busy, a dropped USB frame, a capture
//! process hiccup). Those failures are absorbed here so the session loop
//! never branches on device behaviour:
//!
//! 1. A failed read is retried after `retry_delay` while fewer than
//!    `max_consecutive_failures` reads in a row have failed.
//! 2. Reaching the threshold closes the reader and reopens the device once.
//!    A successful reopen resets the counter.
//! 3. A failed reopen, or reaching the threshold again before a frame has
//!    been read since the reopen, makes the source terminal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{FrameReader, FrameSource, ReaderFactory};
use crate::error::SourceError;
use crate::media::Frame;

/// Retry behaviour for transient device read failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Consecutive failed reads that trigger a reopen
    pub max_consecutive_failures: u32,
    /// Pause before retrying a failed read
    #[serde(with = "millis")]
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            retry_delay: Duration::from_millis(10),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// A local camera
pub struct DeviceSource {
    factory: Arc<dyn ReaderFactory>,
    policy: RetryPolicy,
    reader: Option<Box<dyn FrameReader>>,
    consecutive_failures: u32,
    /// A reopen happened and no frame has been read since
    reopen_pending: bool,
    reopens: u32,
    sequence: u64,
    started: Option<Instant>,
    last_timestamp: Duration,
    terminal: bool,
}

impl DeviceSource {
    pub fn new(factory: Arc<dyn ReaderFactory>, policy: RetryPolicy) -> Self {
        Self {
            factory,
            policy,
            reader: None,
            consecutive_failures: 0,
            reopen_pending: false,
            reopens: 0,
            sequence: 0,
            started: None,
            last_timestamp: Duration::ZERO,
            terminal: false,
        }
    }

    /// Number of reopens performed so far
    pub fn reopens(&self) -> u32 {
        self.reopens
    }

    async fn drop_reader(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            reader.close().await;
        }
    }

    async fn fail(&mut self, reason: String) -> SourceError {
        self.terminal = true;
        self.drop_reader().await;
        tracing::error!(source = %self.factory.label(), reason = %reason, "Device source failed");
        SourceError::read(self.factory.label(), reason)
    }

    /// Handle one failed read; returns an error once the source is terminal
    async fn on_read_failure(&mut self, reason: String) -> Result<(), SourceError> {
        self.consecutive_failures += 1;

        if self.consecutive_failures < self.policy.max_consecutive_failures.max(1) {
            tracing::debug!(
                source = %self.factory.label(),
                failures = self.consecutive_failures,
                reason = %reason,
                "Device read failed, retrying"
            );
            tokio::time::sleep(self.policy.retry_delay).await;
            return Ok(());
        }

        if self.reopen_pending {
            return Err(self
                .fail(format!("still failing after reopen: {}", reason))
                .await);
        }

        tracing::warn!(
            source = %self.factory.label(),
            failures = self.consecutive_failures,
            reason = %reason,
            "Device read failures reached threshold, reopening"
        );

        self.drop_reader().await;
        match self.factory.open().await {
            Ok(reader) => {
                self.reader = Some(reader);
                self.consecutive_failures = 0;
                self.reopen_pending = true;
                self.reopens += 1;
                tracing::info!(source = %self.factory.label(), reopens = self.reopens, "Device reopened");
                Ok(())
            }
            Err(e) => Err(self.fail(format!("reopen failed: {}", e)).await),
        }
    }
}

#[async_trait]
impl FrameSource for DeviceSource {
    fn label(&self) -> String {
        self.factory.label()
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        if self.reader.is_none() && !self.terminal {
            self.reader = Some(self.factory.open().await?);
            tracing::info!(source = %self.factory.label(), "Device opened");
        }
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.terminal {
            return Err(SourceError::read(self.factory.label(), "device source is closed"));
        }

        loop {
            let reader = self
                .reader
                .as_mut()
                .ok_or_else(|| SourceError::read(self.factory.label(), "device is not open"))?;

            let reason = match reader.read_frame().await {
                Ok(Some(image)) => {
                    let now = Instant::now();
                    let started = *self.started.get_or_insert(now);
                    let timestamp = now.duration_since(started).max(self.last_timestamp);

                    let frame = match image.into_frame(self.sequence, timestamp) {
                        Ok(frame) => frame,
                        Err(e) => {
                            self.on_read_failure(e.to_string()).await?;
                            continue;
                        }
                    };

                    self.sequence += 1;
                    self.last_timestamp = timestamp;
                    self.consecutive_failures = 0;
                    self.reopen_pending = false;
                    return Ok(Some(frame));
                }
                Ok(None) => "capture stream ended".to_string(),
                Err(e) => e.to_string(),
            };

            self.on_read_failure(reason).await?;
        }
    }

    async fn close(&mut self) {
        self.drop_reader().await;
        self.terminal = true;
    }
}
