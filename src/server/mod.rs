//! HTTP server
//!
//! ```text
//!                      ┌──────────────────────────────┐
//!  viewer ── HTTP ───► │ axum router (routes)         │
//!                      │   /video_feed  /ws  /offer   │──► SessionLauncher ──► Session tasks
//!                      │   /detect                    │──► BatchAnnotator
//!                      │   /sessions /stats /health   │──► SessionRegistry
//!                      └──────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod listener;
pub mod routes;
pub mod state;

pub use config::{AnnotationConfig, ServerConfig};
pub use error::ApiError;
pub use listener::FramecastServer;
pub use routes::build_router;
pub use state::{AppState, StateParts};
