//! Pluggable time sources for the time-domain store.
//!
//! The scheduler never reads the OS clock directly; it goes through a
//! [`TimeSource`] injected at construction. Production uses [`SystemClock`]
//! (wall-clock epoch milliseconds). Tests and server-authoritative hosts swap
//! in [`ManualClock`] or their own implementation.
//!
//! # Contract
//!
//! `now_millis` must be monotone non-decreasing. The scheduler does not
//! correct for a source that moves backward; overdue tasks fire retroactively
//! in that case.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Elapsed-time provider in milliseconds since an arbitrary epoch.
pub trait TimeSource: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Wall-clock epoch milliseconds (production default).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Hand-advanced clock for deterministic tests.
///
/// Shared freely across threads; `advance` and `set` are atomic.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
        }
    }

    /// Move the clock forward by `delta` milliseconds.
    pub fn advance(&self, delta: u64) {
        self.millis.fetch_add(delta, Ordering::Release);
    }

    /// Jump the clock to an absolute value.
    ///
    /// Moving backward violates the [`TimeSource`] contract; the scheduler's
    /// behavior is then retroactive firing, not an error.
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::Release);
    }
}

impl TimeSource for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let c = ManualClock::new(100);
        assert_eq!(c.now_millis(), 100);
        c.advance(50);
        assert_eq!(c.now_millis(), 150);
        c.set(1_000);
        assert_eq!(c.now_millis(), 1_000);
    }

    #[test]
    fn system_clock_is_non_decreasing() {
        let c = SystemClock;
        let a = c.now_millis();
        let b = c.now_millis();
        assert!(b >= a);
    }
}
