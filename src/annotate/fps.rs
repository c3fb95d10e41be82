//! Frame-rate measurement

use std::time::{Duration, Instant};

/// Intervals at or below this are too short to measure
pub const FPS_EPSILON: Duration = Duration::from_micros(1);

/// Instantaneous frame rate from the interval between consecutive calls
///
/// The first tick only records the time and reports `0.0`. An interval of at
/// most [`FPS_EPSILON`] repeats the previous value instead of reporting an
/// infinite rate, so the output is always finite and non-negative.
#[derive(Debug, Clone, Default)]
pub struct FpsCounter {
    last: Option<Instant>,
    fps: f64,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame now and return the current rate
    pub fn tick(&mut self) -> f64 {
        self.tick_at(Instant::now())
    }

    /// Record a frame at `now` and return the current rate
    pub fn tick_at(&mut self, now: Instant) -> f64 {
        if let Some(last) = self.last {
            let elapsed = now.saturating_duration_since(last);
            if elapsed > FPS_EPSILON {
                let fps = 1.0 / elapsed.as_secs_f64();
                if fps.is_finite() {
                    self.fps = fps;
                }
            }
        }
        self.last = Some(now);
        self.fps
    }

    /// Last reported rate
    pub fn current(&self) -> f64 {
        self.fps
    }
}
