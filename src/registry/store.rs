//! Session registry implementation
//!
//! The registry is the only state shared between sessions. Every mutation
//! happens under one write lock, so the capacity check and the insert are a
//! single atomic step.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use super::config::RegistryConfig;
use super::entry::{SessionDescriptor, SessionEntry, SessionId, SessionInfo};
use super::error::RegistryError;
use crate::session::{CancelToken, PhaseCell};
use crate::stats::{ServerStats, SessionCounters};

/// Central registry for all live sessions
///
/// Uses a synchronous lock: critical sections never await, and removal has
/// to run from [`RegistryGuard::drop`].
pub struct SessionRegistry {
    /// Map of session id to session entry
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,

    /// Configuration
    config: RegistryConfig,

    next_session_id: AtomicU64,
    total_sessions: AtomicU64,
    rejected_sessions: AtomicU64,
    started_at: Instant,
}

impl SessionRegistry {
    /// Create a new session registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new session registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            next_session_id: AtomicU64::new(1),
            total_sessions: AtomicU64::new(0),
            rejected_sessions: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a new session
    ///
    /// Returns a guard that removes the entry when dropped. Fails when the
    /// session limit is reached.
    pub fn register(
        self: &Arc<Self>,
        descriptor: SessionDescriptor,
    ) -> Result<RegistryGuard, RegistryError> {
        let mut sessions = self.sessions.write();

        if !self.config.has_room(sessions.len()) {
            self.rejected_sessions.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                transport = %descriptor.transport,
                source = %descriptor.source,
                max_sessions = self.config.max_sessions,
                "Session rejected: limit reached"
            );
            return Err(RegistryError::CapacityReached {
                max: self.config.max_sessions,
            });
        }

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let entry = SessionEntry::new(id, descriptor);
        let guard = RegistryGuard {
            registry: Arc::clone(self),
            id,
            cancel: entry.cancel.clone(),
            phase: entry.phase.clone(),
            counters: Arc::clone(&entry.counters),
        };

        tracing::info!(
            session_id = id,
            transport = %entry.descriptor.transport,
            source = %entry.descriptor.source,
            peer = ?entry.descriptor.peer,
            sessions = sessions.len() + 1,
            "Session registered"
        );

        sessions.insert(id, entry);
        self.total_sessions.fetch_add(1, Ordering::Relaxed);

        Ok(guard)
    }

    fn unregister(&self, id: SessionId) {
        let removed = self.sessions.write().remove(&id);

        match removed {
            Some(entry) => tracing::info!(
                session_id = id,
                transport = %entry.descriptor.transport,
                age_ms = entry.created_at.elapsed().as_millis() as u64,
                "Session unregistered"
            ),
            None => tracing::warn!(session_id = id, "Unregister for unknown session"),
        }
    }

    /// Ask one session to stop
    pub fn cancel(&self, id: SessionId) -> Result<(), RegistryError> {
        let sessions = self.sessions.read();
        let entry = sessions
            .get(&id)
            .ok_or(RegistryError::SessionNotFound(id))?;
        entry.cancel.cancel();
        tracing::debug!(session_id = id, "Session cancel requested");
        Ok(())
    }

    /// Ask every session to stop
    pub fn cancel_all(&self) {
        let sessions = self.sessions.read();
        for entry in sessions.values() {
            entry.cancel.cancel();
        }
        tracing::info!(sessions = sessions.len(), "Cancelling all sessions");
    }

    /// Check if a session is registered
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().contains_key(&id)
    }

    /// Get information about one session
    pub fn get(&self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.read().get(&id).map(SessionEntry::info)
    }

    /// Get information about all sessions, oldest first
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> =
            self.sessions.read().values().map(SessionEntry::info).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Get total number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Get server-wide statistics
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            total_sessions: self.total_sessions.load(Ordering::Relaxed),
            active_sessions: self.session_count() as u64,
            rejected_sessions: self.rejected_sessions.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of registration, owned by the session
///
/// Dropping the guard removes the entry exactly once, whether the session
/// loop returned normally, failed, or panicked.
#[derive(Debug)]
pub struct RegistryGuard {
    registry: Arc<SessionRegistry>,
    id: SessionId,
    cancel: CancelToken,
    phase: PhaseCell,
    counters: Arc<SessionCounters>,
}

impl RegistryGuard {
    /// The session's id
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The session's cancel token
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The session's shared phase
    pub fn phase(&self) -> PhaseCell {
        self.phase.clone()
    }

    /// The session's counters
    pub fn counters(&self) -> Arc<SessionCounters> {
        Arc::clone(&self.counters)
    }
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.session_count())
            .field("config", &self.config)
            .finish()
    }
}
