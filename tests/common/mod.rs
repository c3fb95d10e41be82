//! In-memory readers, sinks and connectors for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use framecast::annotate::{AnnotationQueue, Passthrough};
use framecast::error::SourceError;
use framecast::media::AnnotatedFrame;
use framecast::registry::{RegistryConfig, SessionRegistry};
use framecast::source::{DeviceSpec, FrameReader, RawImage, ReaderFactory, ReaderOpener};
use framecast::{Delivery, FrameSink, TransportKind};

pub const WIDTH: u32 = 4;
pub const HEIGHT: u32 = 4;

/// What a reader does on one read
#[derive(Debug, Clone, Copy)]
pub enum Read {
    /// An image filled with this byte
    Image(u8),
    Fail,
    End,
}

pub fn image(fill: u8) -> RawImage {
    RawImage::rgb(vec![fill; (WIDTH * HEIGHT * 3) as usize], WIDTH, HEIGHT)
}

pub struct ScriptReader {
    reads: VecDeque<Read>,
}

#[async_trait]
impl FrameReader for ScriptReader {
    async fn read_frame(&mut self) -> Result<Option<RawImage>, SourceError> {
        tokio::task::yield_now().await;
        match self.reads.pop_front() {
            Some(Read::Image(fill)) => Ok(Some(image(fill))),
            Some(Read::Fail) => Err(SourceError::read("script", "injected failure")),
            Some(Read::End) | None => Ok(None),
        }
    }

    async fn close(&mut self) {}
}

/// Hands out one script per open and counts opens
pub struct ScriptFactory {
    scripts: Mutex<VecDeque<Vec<Read>>>,
    /// Script used once the queue is empty; `None` fails the open
    fallback: Option<Vec<Read>>,
    pub opens: AtomicUsize,
}

impl ScriptFactory {
    pub fn new(scripts: Vec<Vec<Read>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            fallback: None,
            opens: AtomicUsize::new(0),
        }
    }

    /// The same script on every open
    pub fn always(script: Vec<Read>) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            fallback: Some(script),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReaderFactory for ScriptFactory {
    fn label(&self) -> String {
        "script".to_string()
    }

    async fn open(&self) -> Result<Box<dyn FrameReader>, SourceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().pop_front().or_else(|| self.fallback.clone());
        match script {
            Some(reads) => Ok(Box::new(ScriptReader { reads: reads.into() })),
            None => Err(SourceError::open("script", "no such device")),
        }
    }
}

/// Devices that stream forever; files are empty
pub struct EndlessCameras {
    pub opened: AtomicUsize,
}

impl EndlessCameras {
    pub fn new() -> Self {
        Self {
            opened: AtomicUsize::new(0),
        }
    }
}

impl ReaderOpener for EndlessCameras {
    fn file(&self, _path: &Path) -> Arc<dyn ReaderFactory> {
        Arc::new(ScriptFactory::always(vec![Read::End]))
    }

    fn device(&self, _device: &DeviceSpec) -> Arc<dyn ReaderFactory> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Arc::new(ScriptFactory::always(vec![Read::Image(7); 1_000_000]))
    }
}

/// Records every delivered frame; can be told to fail after some frames
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub delivered: Arc<Mutex<Vec<AnnotatedFrame>>>,
    pub closes: Arc<AtomicUsize>,
    fail_after: Option<usize>,
}

impl RecordingSink {
    pub fn failing_after(frames: usize) -> Self {
        Self {
            fail_after: Some(frames),
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().len()
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn deliver(&mut self, frame: &AnnotatedFrame) -> Delivery {
        let mut delivered = self.delivered.lock();
        if self.fail_after.is_some_and(|limit| delivered.len() >= limit) {
            return Delivery::Closed;
        }
        delivered.push(frame.clone());
        Delivery::Sent
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn registry(max_sessions: usize) -> Arc<SessionRegistry> {
    Arc::new(SessionRegistry::with_config(
        RegistryConfig::default().max_sessions(max_sessions),
    ))
}

pub fn queue() -> AnnotationQueue {
    AnnotationQueue::start(Arc::new(Passthrough), 1, 4).unwrap()
}
