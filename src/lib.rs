//! framecast: annotated live video delivery
//!
//! Frames are pulled from a camera, a video file or a viewer's own media
//! track, passed through an annotation capability, stamped with the current
//! frame rate and delivered to the viewer over one of three transports:
//!
//! - MJPEG over a long-lived HTTP response (`GET /video_feed`)
//! - binary WebSocket messages (`GET /ws`)
//! - a WebRTC video track negotiated by SDP offer/answer (`POST /offer`)
//!
//! ```text
//!   FrameSource ──► AnnotatorAdapter ──► FrameSink ──► network
//!   (file/device/      (Annotate +          (mjpeg/socket/
//!    peer/relay)        FPS overlay)          peer)
//! ```
//!
//! Every viewer gets its own [`Session`](session::Session) task, registered
//! in the [`SessionRegistry`](registry::SessionRegistry) for as long as it
//! runs. Physical devices are owned by the
//! [`DeviceHub`](source::DeviceHub), which fans one capture out to every
//! session that asks for it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use framecast::annotate::Passthrough;
//! use framecast::{FramecastServer, ServerConfig};
//!
//! # async fn run() -> framecast::Result<()> {
//! let server = FramecastServer::new(ServerConfig::default(), Arc::new(Passthrough))?;
//! server.run_until(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await
//! # }
//! ```

pub mod annotate;
pub mod batch;
pub mod error;
pub mod media;
pub mod registry;
pub mod server;
pub mod session;
pub mod signaling;
pub mod sink;
pub mod source;
pub mod stats;

pub use annotate::{Annotate, AnnotatorAdapter};
pub use error::{Error, Result};
pub use media::{AnnotatedFrame, Frame, PixelFormat};
pub use registry::SessionRegistry;
pub use server::{AppState, FramecastServer, ServerConfig};
pub use session::{CancelToken, Session, SessionLauncher};
pub use sink::{Delivery, FrameSink, TransportKind};
pub use source::{FrameSource, SourceSpec};
