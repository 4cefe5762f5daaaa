//! Injectable time source.
//!
//! Rate limiting and the circuit breaker measure elapsed time through
//! `Clock` so tests can advance time without sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Time source abstraction for testability.
pub trait Clock: Send + Sync {
    /// Monotonic instant.
    fn now(&self) -> Instant;

    /// Wall-clock time in milliseconds since Unix epoch.
    fn now_ms(&self) -> u64;
}

/// System clock implementation using real time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Manually advanced clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    base_ms: u64,
    offset_nanos: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at_ms(1_700_000_000_000)
    }

    #[must_use]
    pub fn starting_at_ms(base_ms: u64) -> Self {
        Self {
            base: Instant::now(),
            base_ms,
            offset_nanos: AtomicU64::new(0),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.offset_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    fn offset(&self) -> Duration {
        Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.offset()
    }

    fn now_ms(&self) -> u64 {
        self.base_ms + u64::try_from(self.offset().as_millis()).unwrap_or(u64::MAX - self.base_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::starting_at_ms(1_000);
        let start = clock.now();
        assert_eq!(clock.now_ms(), 1_000);

        clock.advance(Duration::from_millis(1_500));

        assert_eq!(clock.now().duration_since(start), Duration::from_millis(1_500));
        assert_eq!(clock.now_ms(), 2_500);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(clock.now_ms() > 1_600_000_000_000);
    }
}
