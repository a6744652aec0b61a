//! Epoch-millisecond time sources.
//!
//! # Responsibility
//! - Give services one injectable notion of "now".
//! - Let tests move time forward deterministically.
//!
//! # Invariants
//! - All persisted timestamps are Unix epoch milliseconds.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub const MILLIS_PER_HOUR: i64 = 60 * 60 * 1000;
pub const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock backed by `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }
}

/// Manually driven clock. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set_ms(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Returns the UTC day index used for per-day uniqueness buckets.
pub fn day_bucket(epoch_ms: i64) -> i64 {
    epoch_ms.div_euclid(MILLIS_PER_DAY)
}

#[cfg(test)]
mod tests {
    use super::{day_bucket, Clock, ManualClock, SystemClock, MILLIS_PER_DAY};

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(1_000);
        let other = clock.clone();
        clock.advance_ms(500);
        assert_eq!(other.now_ms(), 1_500);
        other.set_ms(42);
        assert_eq!(clock.now_ms(), 42);
    }

    #[test]
    fn day_bucket_splits_on_utc_midnight() {
        assert_eq!(day_bucket(0), 0);
        assert_eq!(day_bucket(MILLIS_PER_DAY - 1), 0);
        assert_eq!(day_bucket(MILLIS_PER_DAY), 1);
        assert_eq!(day_bucket(-1), -1);
    }
}
