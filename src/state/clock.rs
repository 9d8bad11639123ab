//! Wall clock abstraction and the remaining-time calculation

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Source of "now" in milliseconds since the Unix epoch.
///
/// Every timing decision in the engine goes through this trait so tests can
/// drive time by hand instead of sleeping.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> i64;
}

/// Real wall clock backed by `chrono::Utc::now()`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Hand-driven clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a manual clock frozen at `now_millis`
    pub fn new(now_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(now_millis),
        }
    }

    /// Move the clock forward by `millis`
    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute instant
    pub fn set(&self, now_millis: i64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Remaining milliseconds of a countdown.
///
/// While paused the frozen value is returned untouched; otherwise the window
/// end is compared against `now` and clamped at zero.
pub fn remaining_millis(end_time: i64, paused_remaining: Option<u64>, now: i64) -> u64 {
    match paused_remaining {
        Some(frozen) => frozen,
        None => u64::try_from(end_time.saturating_sub(now)).unwrap_or(0),
    }
}

/// Convert a duration in (possibly fractional) minutes to milliseconds.
///
/// Returns `None` for zero, negative or non-finite input.
pub fn minutes_to_millis(minutes: f64) -> Option<u64> {
    if !minutes.is_finite() || minutes <= 0.0 {
        return None;
    }
    let millis = (minutes * 60_000.0).round();
    if millis < 1.0 || millis > u64::MAX as f64 {
        return None;
    }
    Some(millis as u64)
}
