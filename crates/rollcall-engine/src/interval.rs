//! Self-tuning detection interval.
//!
//! Detection runs at most once per interval. Once enough latency samples
//! exist the interval tracks the recent average cost of a detection cycle
//! with 20% headroom, bounded to [0.1 s, 1.0 s].

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const INITIAL_INTERVAL: Duration = Duration::from_millis(500);
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);
pub const MAX_INTERVAL: Duration = Duration::from_secs(1);
const HEADROOM: f64 = 1.2;
/// Samples averaged for each adjustment.
const WINDOW: usize = 10;
/// Samples retained.
const HISTORY: usize = 20;

#[derive(Debug)]
pub struct DetectionInterval {
    interval: Duration,
    samples: VecDeque<Duration>,
    last_run: Option<Instant>,
}

impl Default for DetectionInterval {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionInterval {
    pub fn new() -> Self {
        Self {
            interval: INITIAL_INTERVAL,
            samples: VecDeque::with_capacity(HISTORY),
            last_run: None,
        }
    }

    /// Whether a detection cycle is due at `now`. Always true before the first run.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_run {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Record that a detection cycle started at `at`.
    pub fn mark_run(&mut self, at: Instant) {
        self.last_run = Some(at);
    }

    /// Record a detection cycle's latency and retune.
    pub fn record(&mut self, latency: Duration) {
        if self.samples.len() == HISTORY {
            self.samples.pop_front();
        }
        self.samples.push_back(latency);

        if self.samples.len() >= WINDOW {
            let recent = self.samples.iter().rev().take(WINDOW);
            let avg = recent.map(Duration::as_secs_f64).sum::<f64>() / WINDOW as f64;
            let target = Duration::from_secs_f64(avg * HEADROOM);
            self.interval = target.clamp(MIN_INTERVAL, MAX_INTERVAL);
        }
    }

    pub fn current(&self) -> Duration {
        self.interval
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}
