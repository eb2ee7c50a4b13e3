//! Time sources for trace timestamps and execution timing

use chrono::{DateTime, Utc};
use std::time::Instant;

pub trait Clock: Send + Sync {
    /// Wall-clock time for trace timestamps
    fn utc_now(&self) -> DateTime<Utc>;

    /// Monotonic milliseconds since an arbitrary origin
    fn monotonic_ms(&self) -> f64;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// A clock that never advances; replays produce identical timings
#[derive(Debug, Clone, Copy)]
pub struct FrozenClock {
    at: DateTime<Utc>,
}

impl FrozenClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { at }
    }
}

impl Clock for FrozenClock {
    fn utc_now(&self) -> DateTime<Utc> {
        self.at
    }

    fn monotonic_ms(&self) -> f64 {
        0.0
    }
}
