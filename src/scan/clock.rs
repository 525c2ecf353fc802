//! Timestamp source for scan points.
//!
//! The timestamp of a point decides which file entry it lands in, so tests
//! and dry runs substitute a deterministic clock.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unix time in seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 * 1e-6
    }
}

/// Returns `start`, `start + step`, `start + 2*step`, ... on successive calls.
#[derive(Debug)]
pub struct SteppingClock {
    start: f64,
    step: f64,
    calls: AtomicU64,
}

impl SteppingClock {
    pub fn new(start: f64, step: f64) -> Self {
        Self {
            start,
            step,
            calls: AtomicU64::new(0),
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> f64 {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.start + self.step * n as f64
    }
}
