//! Frame rate, confidence and latency figures derived from accepted results.

use std::time::{Duration, Instant};

use crate::protocol::VisionResult;

const FPS_WINDOW: Duration = Duration::from_millis(1000);

/// Figures shown on the HUD.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Stats {
    /// Results accepted during the last completed one-second window.
    pub fps: u32,
    pub last_inference_ms: u64,
    pub object_count: usize,
    pub avg_confidence: f64,
}

#[derive(Debug)]
pub struct StatsAggregator {
    window_start: Instant,
    window_count: u32,
    current: Stats,
}

impl StatsAggregator {
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            window_count: 0,
            current: Stats::default(),
        }
    }

    /// Account for one accepted result.
    pub fn record(&mut self, result: &VisionResult, now: Instant) -> Stats {
        self.roll(now);
        self.window_count += 1;
        self.current.last_inference_ms = result.inference_ms;
        self.current.object_count = result.items.len();
        self.current.avg_confidence = mean(&result.items.confidences());
        self.current
    }

    /// Close the fps window once it is a second old. Safe to call on every render tick.
    pub fn roll(&mut self, now: Instant) {
        if now.saturating_duration_since(self.window_start) >= FPS_WINDOW {
            self.current.fps = self.window_count;
            self.window_count = 0;
            self.window_start = now;
        }
    }

    /// Zero everything; the next window starts at `now`.
    pub fn reset(&mut self, now: Instant) {
        *self = Self::new(now);
    }

    /// Forget per-result figures (mode change) while keeping the fps window.
    pub fn clear_result(&mut self) {
        self.current.object_count = 0;
        self.current.avg_confidence = 0.0;
    }

    pub fn current(&self) -> Stats {
        self.current
    }
}

/// Arithmetic mean; 0 for an empty slice. Non-finite entries are ignored.
pub fn mean(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return 0.0;
    }
    finite.iter().sum::<f64>() / finite.len() as f64
}
