//! Statistics for viewer sessions

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Live per-session counters
///
/// Written by the session loop, read by the registry listing.
#[derive(Debug, Default)]
pub struct SessionCounters {
    frames_pulled: AtomicU64,
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
    frames_reordered: AtomicU64,
    /// Last reported FPS, stored as `f64` bits
    fps_bits: AtomicU64,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pulled(&self) {
        self.frames_pulled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, fps: f64) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        self.fps_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    /// A frame the sink or its encoder discarded
    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// A frame discarded for arriving out of timestamp order
    pub fn record_reordered(&self) {
        self.frames_reordered.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy
    pub fn snapshot(&self, duration: Duration) -> SessionStats {
        SessionStats {
            frames_pulled: self.frames_pulled.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_reordered: self.frames_reordered.load(Ordering::Relaxed),
            fps: f64::from_bits(self.fps_bits.load(Ordering::Relaxed)),
            duration,
        }
    }
}

/// Session-level statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    /// Frames pulled from the source
    pub frames_pulled: u64,
    /// Frames handed to the transport
    pub frames_delivered: u64,
    /// Frames the transport discarded (encode failure or superseded)
    pub frames_dropped: u64,
    /// Frames discarded for arriving out of order
    pub frames_reordered: u64,
    /// Frame rate reported on the last delivered frame
    pub fps: f64,
    /// Session duration
    #[serde(serialize_with = "as_secs_f64")]
    pub duration: Duration,
}

impl SessionStats {
    /// Average delivered frame rate over the whole session
    pub fn average_fps(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.frames_delivered as f64 / secs
        } else {
            0.0
        }
    }
}

fn as_secs_f64<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

/// Server-wide statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerStats {
    /// Sessions ever registered
    pub total_sessions: u64,
    /// Sessions currently registered
    pub active_sessions: u64,
    /// Sessions rejected at the capacity limit
    pub rejected_sessions: u64,
    /// Uptime
    #[serde(serialize_with = "as_secs_f64")]
    pub uptime: Duration,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_counters_snapshot() {
        let counters = SessionCounters::new();
        counters.record_pulled();
        counters.record_pulled();
        counters.record_pulled();
        counters.record_delivered(29.5);
        counters.record_dropped();
        counters.record_reordered();

        let stats = counters.snapshot(Duration::from_secs(2));
        assert_eq!(stats.frames_pulled, 3);
        assert_eq!(stats.frames_delivered, 1);
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.frames_reordered, 1);
        assert_eq!(stats.fps, 29.5);
        assert_eq!(stats.duration, Duration::from_secs(2));
    }

    #[test]
    fn test_average_fps() {
        let stats = SessionStats {
            frames_delivered: 300,
            duration: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(stats.average_fps(), 30.0);
    }

    #[test]
    fn test_average_fps_zero_duration() {
        let stats = SessionStats {
            frames_delivered: 10,
            ..Default::default()
        };
        assert_eq!(stats.average_fps(), 0.0);
    }

    #[test]
    fn test_server_stats_new() {
        let stats = ServerStats::new();
        assert_eq!(stats.total_sessions, 0);
        assert_eq!(stats.active_sessions, 0);
        assert_eq!(stats.rejected_sessions, 0);
    }

    #[test]
    fn test_session_stats_json() {
        let stats = SessionStats {
            frames_delivered: 5,
            duration: Duration::from_millis(1500),
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["frames_delivered"], 5);
        assert_eq!(json["duration"], 1.5);
    }
}
