//! Process-wide estimate of how long a chunk takes to summarize.
//!
//! Every session appends its observed per-chunk durations to one shared [`TimeEstimator`], so
//! later sessions start with realistic ETAs. Observations are kept in a bounded rolling window.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const WINDOW: usize = 256;

/// Rolling average of observed chunk durations, shared across sessions.
#[derive(Debug)]
pub struct TimeEstimator {
    samples: Mutex<VecDeque<f64>>,
    default_seconds: f64,
}

impl TimeEstimator {
    /// Create an estimator that assumes `default_seconds` per chunk until data arrives.
    pub fn new(default_seconds: f64) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(WINDOW)),
            default_seconds: default_seconds.max(0.0),
        }
    }

    /// Record how long one chunk took.
    pub fn record(&self, elapsed: Duration) {
        let mut samples = self.lock();
        if samples.len() == WINDOW {
            samples.pop_front();
        }
        samples.push_back(elapsed.as_secs_f64());
    }

    /// Mean observed duration in seconds, or the configured default.
    pub fn average(&self) -> f64 {
        let samples = self.lock();
        if samples.is_empty() {
            return self.default_seconds;
        }
        samples.iter().sum::<f64>() / samples.len() as f64
    }

    /// Number of observations currently in the window.
    pub fn observations(&self) -> usize {
        self.lock().len()
    }

    /// Human-readable estimate for `remaining_chunks`.
    pub fn estimate(&self, remaining_chunks: usize) -> String {
        let seconds = (remaining_chunks as f64 * self.average()).round() as u64;
        format_duration(seconds)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<f64>> {
        match self.samples.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Format seconds as `"45s"`, `"2m"` or `"2m 5s"`.
pub fn format_duration(total_seconds: u64) -> String {
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    match (minutes, seconds) {
        (0, seconds) => format!("{seconds}s"),
        (minutes, 0) => format!("{minutes}m"),
        (minutes, seconds) => format!("{minutes}m {seconds}s"),
    }
}
