//! Registry error types

use thiserror::Error;

use super::entry::SessionId;

/// Error type for registry operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The concurrent session limit is reached
    #[error("session limit reached ({max} sessions)")]
    CapacityReached { max: usize },
    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),
}
