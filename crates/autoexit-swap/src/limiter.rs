//! Minimum-interval rate limiter.
//!
//! Spaces calls to one provider at least `interval` apart by delaying the
//! caller, never by failing it. The delay aborts on shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use autoexit_core::Clock;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Default spacing between calls to one provider.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(500);

/// Returned when shutdown interrupts a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Per-provider minimum-interval limiter.
pub struct MinIntervalLimiter {
    interval: Duration,
    clock: Arc<dyn Clock>,
    next_slot: Mutex<Option<Instant>>,
}

impl MinIntervalLimiter {
    pub fn new(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            interval,
            clock,
            next_slot: Mutex::new(None),
        }
    }

    /// Reserve the next call slot and return how long to wait for it.
    ///
    /// Slots are handed out in order, so concurrent callers queue behind
    /// each other instead of all firing after the same delay.
    pub fn reserve(&self) -> Duration {
        let now = self.clock.now();
        let mut next = self.next_slot.lock();
        let slot = match *next {
            Some(at) if at > now => at,
            _ => now,
        };
        *next = Some(slot + self.interval);
        slot.duration_since(now)
    }

    /// Wait for a call slot.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        let wait = self.reserve();
        if wait.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(Cancelled),
            _ = tokio::time::sleep(wait) => Ok(()),
        }
    }
}

/// Sleep that aborts on shutdown.
pub async fn cancellable_sleep(duration: Duration, cancel: &CancellationToken) -> Result<(), Cancelled> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
