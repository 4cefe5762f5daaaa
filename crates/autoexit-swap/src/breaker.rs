//! Per-provider circuit breaker.
//!
//! Closed until `threshold` failures accumulate, then open: calls are
//! refused without touching the network. Once `timeout` has elapsed since
//! the last failure the breaker is half-open and lets exactly one trial call
//! through. A success anywhere resets it; a failed trial re-opens it with
//! a fresh timestamp.

use std::sync::Arc;
use std::time::{Duration, Instant};

use autoexit_core::Clock;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Default failures before opening.
pub const DEFAULT_THRESHOLD: u32 = 5;
/// Default open duration.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Snapshot of breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub failure_count: u32,
    pub last_failure_at: Option<Instant>,
    pub is_open: bool,
}

#[derive(Debug)]
struct BreakerState {
    failure_count: u32,
    last_failure_at: Option<Instant>,
    is_open: bool,
    trial_in_flight: bool,
}

/// Failure-count gate for one provider.
pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, threshold: u32, timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            threshold: threshold.max(1),
            timeout,
            clock,
            state: Mutex::new(BreakerState {
                failure_count: 0,
                last_failure_at: None,
                is_open: false,
                trial_in_flight: false,
            }),
        }
    }

    /// Ask to make a call. `false` means skip this provider.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if !state.is_open {
            return true;
        }

        let cooled = state
            .last_failure_at
            .map_or(true, |at| self.clock.now().duration_since(at) >= self.timeout);
        if !cooled || state.trial_in_flight {
            return false;
        }

        state.trial_in_flight = true;
        info!(provider = %self.name, "Circuit half-open, allowing trial call");
        true
    }

    /// Reset after a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if state.is_open {
            info!(provider = %self.name, "Circuit closed");
        }
        state.failure_count = 0;
        state.last_failure_at = None;
        state.is_open = false;
        state.trial_in_flight = false;
        autoexit_telemetry::Metrics::circuit_open(&self.name, false);
    }

    /// Count a failed call.
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure_at = Some(self.clock.now());
        state.trial_in_flight = false;

        if !state.is_open && state.failure_count >= self.threshold {
            state.is_open = true;
            warn!(
                provider = %self.name,
                failures = state.failure_count,
                timeout_ms = self.timeout.as_millis() as u64,
                "Circuit opened"
            );
        }
        autoexit_telemetry::Metrics::circuit_open(&self.name, state.is_open);
    }

    /// Release a half-open slot whose call ended without an outcome.
    /// Counts and timestamps are left as they were.
    pub fn record_abandoned(&self) {
        let mut state = self.state.lock();
        if state.trial_in_flight {
            state.trial_in_flight = false;
            debug!(provider = %self.name, "Half-open call abandoned");
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state.lock();
        BreakerSnapshot {
            failure_count: state.failure_count,
            last_failure_at: state.last_failure_at,
            is_open: state.is_open,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoexit_core::ManualClock;

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::new("test", 5, Duration::from_secs(60), clock)
    }

    #[test]
    fn test_stays_closed_below_threshold() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock);
        for _ in 0..4 {
            assert!(b.try_acquire());
            b.record_failure();
        }
        assert!(!b.snapshot().is_open);
        assert!(b.try_acquire());
    }

    #[test]
    fn test_opens_at_threshold_and_skips() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock.clone());
        for _ in 0..5 {
            b.record_failure();
        }
        assert!(b.snapshot().is_open);
        assert!(!b.try_acquire());

        clock.advance(Duration::from_secs(59));
        assert!(!b.try_acquire());
    }

    #[test]
    fn test_half_open_allows_exactly_one_call() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock.clone());
        for _ in 0..5 {
            b.record_failure();
        }

        clock.advance(Duration::from_secs(60));
        assert!(b.try_acquire());
        assert!(!b.try_acquire());
        assert!(!b.try_acquire());
    }

    #[test]
    fn test_half_open_success_resets() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock.clone());
        for _ in 0..5 {
            b.record_failure();
        }
        clock.advance(Duration::from_secs(61));
        assert!(b.try_acquire());
        b.record_success();

        let snap = b.snapshot();
        assert_eq!(snap.failure_count, 0);
        assert!(!snap.is_open);
        assert!(b.try_acquire());
    }

    #[test]
    fn test_half_open_failure_reopens_with_fresh_timestamp() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock.clone());
        for _ in 0..5 {
            b.record_failure();
        }
        clock.advance(Duration::from_secs(60));
        assert!(b.try_acquire());
        b.record_failure();

        assert!(b.snapshot().is_open);
        assert!(!b.try_acquire());
        clock.advance(Duration::from_secs(60));
        assert!(b.try_acquire());
    }

    #[test]
    fn test_abandoned_half_open_call_frees_the_slot() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock.clone());
        for _ in 0..5 {
            b.record_failure();
        }
        clock.advance(Duration::from_secs(60));
        assert!(b.try_acquire());
        assert!(!b.try_acquire());

        b.record_abandoned();

        let snap = b.snapshot();
        assert!(snap.is_open);
        assert_eq!(snap.failure_count, 5);
        assert!(b.try_acquire());
    }

    #[test]
    fn test_success_resets_count_while_closed() {
        let clock = Arc::new(ManualClock::new());
        let b = breaker(clock);
        for _ in 0..4 {
            b.record_failure();
        }
        b.record_success();
        b.record_failure();
        assert_eq!(b.snapshot().failure_count, 1);
        assert!(!b.snapshot().is_open);
    }
}
