//! Session entry types
//!
//! This module defines the per-session record stored in the registry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::session::{CancelToken, PhaseCell, SessionPhase};
use crate::sink::TransportKind;
use crate::stats::{SessionCounters, SessionStats};

/// Registry-assigned session identifier
pub type SessionId = u64;

/// What a new session is, supplied at registration
#[derive(Debug, Clone)]
pub struct SessionDescriptor {
    pub transport: TransportKind,
    pub source: String,
    pub peer: Option<SocketAddr>,
}

impl SessionDescriptor {
    pub fn new(transport: TransportKind, source: impl Into<String>) -> Self {
        Self {
            transport,
            source: source.into(),
            peer: None,
        }
    }

    /// Record the viewer's address
    pub fn peer(mut self, addr: SocketAddr) -> Self {
        self.peer = Some(addr);
        self
    }
}

/// Entry for a single session in the registry
#[derive(Debug)]
pub struct SessionEntry {
    pub id: SessionId,
    pub descriptor: SessionDescriptor,
    pub created_at: Instant,
    /// Shared with the session loop
    pub cancel: CancelToken,
    pub phase: PhaseCell,
    pub counters: Arc<SessionCounters>,
}

impl SessionEntry {
    pub(super) fn new(id: SessionId, descriptor: SessionDescriptor) -> Self {
        Self {
            id,
            descriptor,
            created_at: Instant::now(),
            cancel: CancelToken::new(),
            phase: PhaseCell::new(),
            counters: Arc::new(SessionCounters::new()),
        }
    }

    /// Serializable view for listings
    pub fn info(&self) -> SessionInfo {
        let age = self.created_at.elapsed();
        SessionInfo {
            id: self.id,
            transport: self.descriptor.transport,
            source: self.descriptor.source.clone(),
            peer: self.descriptor.peer.map(|addr| addr.to_string()),
            phase: self.phase.get(),
            age_secs: age.as_secs_f64(),
            stats: self.counters.snapshot(age),
        }
    }
}

/// Public information about a live session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub transport: TransportKind,
    pub source: String,
    pub peer: Option<String>,
    pub phase: SessionPhase,
    pub age_secs: f64,
    pub stats: SessionStats,
}
