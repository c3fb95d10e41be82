//! Registry configuration

/// Configuration for the session registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Maximum concurrent sessions (0 = unlimited)
    pub max_sessions: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { max_sessions: 0 }
    }
}

impl RegistryConfig {
    /// Set the session limit
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Whether `count` live sessions leave room for one more
    pub fn has_room(&self, count: usize) -> bool {
        self.max_sessions == 0 || count < self.max_sessions
    }
}
