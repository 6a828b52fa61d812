//! Session time origin.
//!
//! `t0` is anchored on the first appended sample so that resumed sessions
//! continue after the time values already in the buffers.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic nanosecond clock
pub trait Clock: Send + Sync {
    fn now_nanos(&self) -> i64;
}

/// `Instant`-based clock, nanoseconds since construction
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    base: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now_nanos(&self) -> i64 {
        self.base.elapsed().as_nanos() as i64
    }
}

/// Manually advanced clock for tests and replay
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_nanos: i64) -> Self {
        Self {
            nanos: Arc::new(AtomicI64::new(start_nanos)),
        }
    }

    pub fn advance_nanos(&self, delta: i64) {
        self.nanos.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: f64) {
        self.advance_nanos((secs * 1e9) as i64);
    }

    pub fn set_nanos(&self, nanos: i64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> i64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

/// Session time origin `t0`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeOrigin {
    t0: Option<i64>,
}

impl TimeOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget `t0`; the next sample anchors a new origin
    pub fn reset(&mut self) {
        self.t0 = None;
    }

    pub fn is_set(&self) -> bool {
        self.t0.is_some()
    }

    pub fn t0(&self) -> Option<i64> {
        self.t0
    }

    /// Anchor `t0` so that `now` maps to `resume_secs`
    ///
    /// No-op once set. `resume_secs` is the largest time value already
    /// buffered (`None` when the time channels are empty).
    pub fn anchor(&mut self, now_nanos: i64, resume_secs: Option<f64>) -> i64 {
        *self.t0.get_or_insert_with(|| {
            let resume = resume_secs.filter(|v| v.is_finite()).unwrap_or(0.0);
            now_nanos - (resume * 1e9) as i64
        })
    }

    /// Seconds elapsed since `t0` (0.0 when unset)
    #[inline]
    pub fn elapsed_secs(&self, now_nanos: i64) -> f64 {
        match self.t0 {
            Some(t0) => (now_nanos - t0) as f64 / 1e9,
            None => 0.0,
        }
    }
}
