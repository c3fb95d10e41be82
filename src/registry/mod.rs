//! Session registry
//!
//! The registry tracks every live viewer session for listing, shutdown and
//! bounded concurrency. It is the only mutable state shared between
//! sessions.
//!
//! # Lifecycle
//!
//! ```text
//!   handler                      Arc<SessionRegistry>
//!      │  register(descriptor)  ┌────────────────────────────┐
//!      ├───────────────────────►│ sessions: HashMap<Id,      │
//!      │  ◄── RegistryGuard     │   SessionEntry {           │
//!      │                        │     cancel, phase,         │
//!      ▼                        │     counters, ... }>       │
//!   Session::spawn(guard)       └────────────▲───────────────┘
//!      │                                     │
//!      └── loop exits / panics ── drop(guard) ┘  (entry removed once)
//! ```

pub mod config;
pub mod entry;
pub mod error;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{SessionDescriptor, SessionEntry, SessionId, SessionInfo};
pub use error::RegistryError;
pub use store::{RegistryGuard, SessionRegistry};
