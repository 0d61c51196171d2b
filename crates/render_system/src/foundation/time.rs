//! Time management utilities

use std::time::{Duration, Instant};

/// Running stopwatch for measuring frame phases
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start_time: Instant,
}

impl Stopwatch {
    /// Create a stopwatch running from now
    pub fn start_new() -> Self {
        Self { start_time: Instant::now() }
    }

    /// Time since the stopwatch was started
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Elapsed time in milliseconds, for log output
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}
