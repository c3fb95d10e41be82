//! Session assembly shared by every transport handler

use std::sync::Arc;

use tokio::task::JoinHandle;

use super::{Session, SessionOutcome};
use crate::annotate::{AnnotationQueue, AnnotatorAdapter};
use crate::error::SourceError;
use crate::media::OverlayStyle;
use crate::registry::{RegistryError, RegistryGuard, SessionDescriptor, SessionRegistry};
use crate::sink::FrameSink;
use crate::source::{FrameSource, SourceFactory, SourceSpec};

/// Registers, assembles and spawns sessions
///
/// Handlers register first, so a full server rejects a viewer before any
/// device is opened, then acquire the source and connect their sink.
pub struct SessionLauncher {
    registry: Arc<SessionRegistry>,
    sources: SourceFactory,
    queue: AnnotationQueue,
    overlay: OverlayStyle,
}

impl SessionLauncher {
    pub fn new(
        registry: Arc<SessionRegistry>,
        sources: SourceFactory,
        queue: AnnotationQueue,
        overlay: OverlayStyle,
    ) -> Self {
        Self {
            registry,
            sources,
            queue,
            overlay,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn sources(&self) -> &SourceFactory {
        &self.sources
    }

    /// The shared annotation pool
    pub fn queue(&self) -> &AnnotationQueue {
        &self.queue
    }

    /// Reserve a registry slot
    pub fn register(&self, descriptor: SessionDescriptor) -> Result<RegistryGuard, RegistryError> {
        self.registry.register(descriptor)
    }

    /// Open the source behind `spec`
    pub async fn acquire(&self, spec: &SourceSpec) -> Result<Box<dyn FrameSource>, SourceError> {
        self.sources.acquire(spec).await
    }

    /// Build the session and start its loop
    pub fn launch(
        &self,
        guard: RegistryGuard,
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
    ) -> JoinHandle<SessionOutcome> {
        let annotator = AnnotatorAdapter::new(self.queue.clone(), self.overlay);
        Session::new(guard, source, annotator, sink).spawn()
    }
}
