//! Device ownership and fan-out
//!
//! A physical camera can only be opened once. [`DeviceHub`] owns every open
//! device and decides what happens when a second session asks for one:
//!
//! - [`SharingMode::Relay`] (default): a single pump task reads the device
//!   and broadcasts frames to every subscribed session. Slow subscribers skip
//!   ahead to the newest frames instead of stalling the pump.
//! - [`SharingMode::Exclusive`]: the second session fails fast with
//!   [`SourceError::Busy`].
//!
//! The pump closes the device when its last subscriber leaves or the device
//! source becomes terminal.
//!
//! ```text
//!                 DeviceHub
//!          devices: HashMap<DeviceSpec, Relay>
//!                      │
//!          pump task: DeviceSource::next_frame()
//!                      │ broadcast::Sender<RelayEvent>
//!          ┌───────────┼───────────┐
//!          ▼           ▼           ▼
//!     RelaySource RelaySource RelaySource   (one per session)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

use super::device::{DeviceSource, RetryPolicy};
use super::process::ReaderOpener;
use super::{DeviceSpec, FrameSource};
use crate::error::SourceError;
use crate::media::Frame;
use crate::session::CancelToken;

/// Default number of frames buffered per relay
pub const DEFAULT_RELAY_CAPACITY: usize = 2;

/// What to do when a device that is already open is requested again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharingMode {
    /// Share one capture between all sessions
    #[default]
    Relay,
    /// One session per device; later requests are rejected
    Exclusive,
}

#[derive(Debug, Clone)]
enum RelayEvent {
    Frame(Frame),
    /// The device source ended; `Some` carries the failure
    Ended(Option<String>),
}

#[derive(Debug, Default)]
struct Subscribers {
    count: usize,
    stopping: bool,
}

struct Relay {
    label: String,
    tx: broadcast::Sender<RelayEvent>,
    subscribers: parking_lot::Mutex<Subscribers>,
    /// Tells the pump to stop
    stop: CancelToken,
    /// Cancelled by the pump once the device is closed
    done: CancelToken,
}

impl Relay {
    /// Add a subscriber unless the relay is shutting down
    fn attach(self: &Arc<Self>) -> Option<RelaySource> {
        let mut subscribers = self.subscribers.lock();
        if subscribers.stopping {
            return None;
        }
        subscribers.count += 1;
        Some(RelaySource {
            relay: Arc::clone(self),
            rx: self.tx.subscribe(),
            attached: true,
        })
    }

    fn detach(&self) {
        let mut subscribers = self.subscribers.lock();
        subscribers.count = subscribers.count.saturating_sub(1);
        if subscribers.count == 0 && !subscribers.stopping {
            subscribers.stopping = true;
            self.stop.cancel();
            tracing::debug!(source = %self.label, "Last relay subscriber left");
        }
    }

    fn mark_stopping(&self) {
        self.subscribers.lock().stopping = true;
    }

    fn is_live(&self) -> bool {
        !self.subscribers.lock().stopping
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().count
    }
}

/// Owner of all open capture devices
pub struct DeviceHub {
    mode: SharingMode,
    policy: RetryPolicy,
    capacity: usize,
    opener: Arc<dyn ReaderOpener>,
    devices: Mutex<HashMap<DeviceSpec, Arc<Relay>>>,
}

impl DeviceHub {
    pub fn new(opener: Arc<dyn ReaderOpener>, mode: SharingMode, policy: RetryPolicy) -> Self {
        Self {
            mode,
            policy,
            capacity: DEFAULT_RELAY_CAPACITY,
            opener,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Set the per-relay frame buffer
    pub fn relay_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// The configured sharing mode
    pub fn mode(&self) -> SharingMode {
        self.mode
    }

    /// Get a source for `device`, opening it if nobody holds it yet
    pub async fn acquire(&self, device: &DeviceSpec) -> Result<Box<dyn FrameSource>, SourceError> {
        let mut devices = self.devices.lock().await;

        if let Some(relay) = devices.get(device).cloned() {
            if relay.is_live() {
                if self.mode == SharingMode::Exclusive {
                    tracing::warn!(source = %device, "Device busy");
                    return Err(SourceError::Busy(device.to_string()));
                }
                if let Some(source) = relay.attach() {
                    tracing::info!(
                        source = %device,
                        subscribers = relay.subscriber_count(),
                        "Joined device relay"
                    );
                    return Ok(Box::new(source));
                }
            }

            // Previous capture is shutting down; wait for it to release the device
            relay.done.cancelled().await;
            devices.remove(device);
        }

        let mut source = DeviceSource::new(self.opener.device(device), self.policy);
        source.open().await?;

        let (tx, _) = broadcast::channel(self.capacity);
        let relay = Arc::new(Relay {
            label: device.to_string(),
            tx,
            subscribers: parking_lot::Mutex::new(Subscribers::default()),
            stop: CancelToken::new(),
            done: CancelToken::new(),
        });
        let subscriber = relay
            .attach()
            .ok_or_else(|| SourceError::Busy(device.to_string()))?;

        tokio::spawn(pump(Arc::clone(&relay), source));
        devices.insert(device.clone(), relay);

        tracing::info!(source = %device, mode = ?self.mode, "Device relay started");
        Ok(Box::new(subscriber))
    }

    /// Devices currently being captured and their subscriber counts
    pub async fn active_devices(&self) -> Vec<(String, usize)> {
        self.devices
            .lock()
            .await
            .values()
            .filter(|relay| relay.is_live())
            .map(|relay| (relay.label.clone(), relay.subscriber_count()))
            .collect()
    }
}

async fn pump(relay: Arc<Relay>, mut source: DeviceSource) {
    let mut delivered: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = relay.stop.cancelled() => break,
            result = source.next_frame() => match result {
                Ok(Some(frame)) => {
                    delivered += 1;
                    // No receivers only happens between the last detach and stop
                    let _ = relay.tx.send(RelayEvent::Frame(frame));
                }
                Ok(None) => {
                    relay.mark_stopping();
                    let _ = relay.tx.send(RelayEvent::Ended(None));
                    break;
                }
                Err(e) => {
                    relay.mark_stopping();
                    let _ = relay.tx.send(RelayEvent::Ended(Some(e.to_string())));
                    break;
                }
            }
        }
    }

    source.close().await;
    relay.done.cancel();
    tracing::info!(source = %relay.label, frames = delivered, "Device relay stopped");
}

/// One session's view of a relayed device
pub struct RelaySource {
    relay: Arc<Relay>,
    rx: broadcast::Receiver<RelayEvent>,
    attached: bool,
}

impl RelaySource {
    fn release(&mut self) {
        if self.attached {
            self.attached = false;
            self.relay.detach();
        }
    }
}

#[async_trait]
impl FrameSource for RelaySource {
    fn label(&self) -> String {
        self.relay.label.clone()
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if !self.attached {
            return Ok(None);
        }

        loop {
            match self.rx.recv().await {
                Ok(RelayEvent::Frame(frame)) => return Ok(Some(frame)),
                Ok(RelayEvent::Ended(None)) => return Ok(None),
                Ok(RelayEvent::Ended(Some(reason))) => {
                    return Err(SourceError::read(self.relay.label.clone(), reason))
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(source = %self.relay.label, skipped = skipped, "Relay subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        self.release();
    }
}

impl Drop for RelaySource {
    fn drop(&mut self) {
        self.release();
    }
}
