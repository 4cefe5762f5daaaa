//! Prometheus metrics for the autoexit monitor.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which is a programming error that should crash
//! at first use rather than silently drop observations.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram, register_int_counter,
    register_int_gauge, CounterVec, GaugeVec, Histogram, IntCounter, IntGauge,
};

/// Positions currently under monitoring.
pub static POSITIONS_MONITORED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "autoexit_positions_monitored",
        "Number of positions currently monitored"
    )
    .unwrap()
});

/// Exit attempts triggered by the monitor.
/// Labels: reason (take_profit/stop_loss/trailing_stop)
pub static EXIT_ATTEMPTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "autoexit_exit_attempts_total",
        "Total exit attempts triggered",
        &["reason"]
    )
    .unwrap()
});

/// Confirmed exits.
pub static EXIT_SUCCESS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "autoexit_exit_success_total",
        "Total confirmed exits",
        &["provider", "reason"]
    )
    .unwrap()
});

/// Exits where every provider failed.
pub static EXIT_FAILURE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "autoexit_exit_failure_total",
        "Total exits that failed on every provider",
        &["reason"]
    )
    .unwrap()
});

/// Provider failures by classification.
pub static PROVIDER_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "autoexit_provider_failures_total",
        "Provider call failures by classification",
        &["provider", "kind"]
    )
    .unwrap()
});

/// Circuit breaker state per provider (1 = open).
pub static CIRCUIT_OPEN: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "autoexit_circuit_open",
        "Circuit breaker state (1=open)",
        &["provider"]
    )
    .unwrap()
});

/// Calls skipped because the breaker was open.
pub static CIRCUIT_SKIPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "autoexit_circuit_skipped_total",
        "Provider calls skipped by an open circuit breaker",
        &["provider"]
    )
    .unwrap()
});

/// Positions admitted by discovery.
/// Labels: path (buy_event/balance)
pub static DISCOVERY_ADMITTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "autoexit_discovery_admitted_total",
        "Positions admitted by discovery",
        &["path"]
    )
    .unwrap()
});

/// Positions dropped from monitoring after repeated unexpected errors.
pub static EVICTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "autoexit_evictions_total",
        "Positions evicted after repeated unexpected errors"
    )
    .unwrap()
});

/// Unexpected evaluation errors (position kept, flagged for attention).
pub static NEEDS_ATTENTION_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "autoexit_needs_attention_total",
        "Unexpected evaluation errors flagged for attention"
    )
    .unwrap()
});

/// Price lookups that returned nothing.
pub static PRICE_UNAVAILABLE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "autoexit_price_unavailable_total",
        "Price lookups skipped because no price was available"
    )
    .unwrap()
});

/// Wall time of one monitor tick in milliseconds.
pub static MONITOR_TICK_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "autoexit_monitor_tick_ms",
        "Monitor tick duration in milliseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 30000.0]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn positions_monitored(count: usize) {
        POSITIONS_MONITORED.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn exit_attempt(reason: &str) {
        EXIT_ATTEMPTS_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn exit_success(provider: &str, reason: &str) {
        EXIT_SUCCESS_TOTAL
            .with_label_values(&[provider, reason])
            .inc();
    }

    pub fn exit_failure(reason: &str) {
        EXIT_FAILURE_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record a classified provider failure.
    pub fn provider_failure(provider: &str, kind: &str) {
        PROVIDER_FAILURES_TOTAL
            .with_label_values(&[provider, kind])
            .inc();
    }

    pub fn circuit_open(provider: &str, is_open: bool) {
        CIRCUIT_OPEN
            .with_label_values(&[provider])
            .set(if is_open { 1.0 } else { 0.0 });
    }

    pub fn circuit_skipped(provider: &str) {
        CIRCUIT_SKIPPED_TOTAL.with_label_values(&[provider]).inc();
    }

    pub fn discovery_admitted(path: &str) {
        DISCOVERY_ADMITTED_TOTAL.with_label_values(&[path]).inc();
    }

    pub fn position_evicted() {
        EVICTIONS_TOTAL.inc();
    }

    pub fn needs_attention() {
        NEEDS_ATTENTION_TOTAL.inc();
    }

    pub fn price_unavailable() {
        PRICE_UNAVAILABLE_TOTAL.inc();
    }

    pub fn monitor_tick(duration_ms: f64) {
        MONITOR_TICK_MS.observe(duration_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let before = EXIT_ATTEMPTS_TOTAL.with_label_values(&["stop_loss"]).get();
        Metrics::exit_attempt("stop_loss");
        let after = EXIT_ATTEMPTS_TOTAL.with_label_values(&["stop_loss"]).get();
        assert!((after - before - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_circuit_gauge() {
        Metrics::circuit_open("test_provider", true);
        assert!((CIRCUIT_OPEN.with_label_values(&["test_provider"]).get() - 1.0).abs() < f64::EPSILON);
        Metrics::circuit_open("test_provider", false);
        assert!(CIRCUIT_OPEN.with_label_values(&["test_provider"]).get().abs() < f64::EPSILON);
    }
}
