//! Position monitor loop.
//!
//! Each tick takes a snapshot of monitored identities and spawns an
//! evaluation for each, bounded by a semaphore. An identity is claimed in
//! the store's in-flight set before anything is awaited and released when
//! its evaluation settles. The loop does not wait for a tick's evaluations
//! before starting the next, so one slow exit never delays the others and
//! later ticks skip the identity until it settles.
//!
//! Per identity: price (skip if unavailable), raise the high-water mark,
//! evaluate exit conditions, and on a match sell the full quantity
//! through the dispatcher. A confirmed exit is recorded in the store and
//! emitted as an event. A failed exit leaves the position for the next
//! tick. An unexpected evaluation error raises a needs-attention event and
//! only evicts after `max_unexpected_errors` in a row.

use std::sync::Arc;
use std::time::{Duration, Instant};

use autoexit_core::{Address, ExitReason, PositionKey, Price, SlippageBps, TokenAmount};
use autoexit_position::{Position, PositionStore};
use autoexit_swap::{SwapDispatcher, SwapError, WalletHandle};
use autoexit_telemetry::Metrics;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{MonitorError, MonitorResult};
use crate::event::{ExitEvent, MonitorEvent};
use crate::sources::{DynEventSink, DynPriceSource};

/// Monitor loop tuning.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub tick_interval: Duration,
    /// Identities evaluated concurrently within one tick.
    pub max_concurrent: usize,
    /// Used when a position's policy does not set its own.
    pub default_slippage: SlippageBps,
    /// Consecutive unexpected errors before a position is evicted.
    /// `1` evicts on the first one.
    pub max_unexpected_errors: u32,
    /// Asset received when selling.
    pub exit_asset: Address,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1000),
            max_concurrent: 4,
            default_slippage: SlippageBps::default(),
            max_unexpected_errors: 3,
            exit_asset: Address::native_mint(),
        }
    }
}

/// Counts for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub evaluated: usize,
    pub skipped_in_flight: usize,
    pub price_unavailable: usize,
    pub exited: usize,
    pub exit_failed: usize,
    pub needs_attention: usize,
    pub evicted: usize,
}

impl TickSummary {
    fn record(&mut self, outcome: Outcome) {
        self.evaluated += 1;
        match outcome {
            Outcome::PriceUnavailable => self.price_unavailable += 1,
            Outcome::Exited => self.exited += 1,
            Outcome::ExitFailed => self.exit_failed += 1,
            Outcome::NeedsAttention => self.needs_attention += 1,
            Outcome::Evicted => self.evicted += 1,
            Outcome::Gone | Outcome::Hold | Outcome::Cancelled => {}
        }
    }

    fn record_joined(&mut self, joined: Result<Outcome, JoinError>) {
        match joined {
            Ok(outcome) => self.record(outcome),
            Err(e) => error!(error = %e, "Evaluation task failed"),
        }
    }

    #[must_use]
    pub fn has_activity(&self) -> bool {
        self.exited + self.exit_failed + self.needs_attention + self.evicted > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Removed from the store since the snapshot.
    Gone,
    PriceUnavailable,
    Hold,
    Exited,
    ExitFailed,
    Cancelled,
    NeedsAttention,
    Evicted,
}

/// Fast loop over monitored positions.
#[derive(Clone)]
pub struct PositionMonitor {
    store: Arc<PositionStore>,
    dispatcher: Arc<SwapDispatcher>,
    prices: DynPriceSource,
    sink: DynEventSink,
    config: MonitorConfig,
    unexpected: Arc<DashMap<PositionKey, u32>>,
    permits: Arc<Semaphore>,
}

impl PositionMonitor {
    pub fn new(
        store: Arc<PositionStore>,
        dispatcher: Arc<SwapDispatcher>,
        prices: DynPriceSource,
        sink: DynEventSink,
        config: MonitorConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            store,
            dispatcher,
            prices,
            sink,
            config,
            unexpected: Arc::new(DashMap::new()),
            permits,
        }
    }

    /// Run ticks until `cancel` fires.
    ///
    /// Evaluations live in a set owned by the loop, so a slow exit never
    /// holds up the next tick: each tick spawns the identities it can claim
    /// and identities still in flight are skipped. On cancel the loop stops
    /// spawning and waits for in-flight evaluations to settle.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            tick_ms = self.config.tick_interval.as_millis() as u64,
            max_concurrent = self.config.max_concurrent,
            max_unexpected_errors = self.config.max_unexpected_errors,
            "PositionMonitor started"
        );

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight = JoinSet::new();
        let mut settled = TickSummary::default();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(in_flight = in_flight.len(), "PositionMonitor stopping");
                    break;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    settled.record_joined(joined);
                }
                _ = ticker.tick() => {
                    if settled.has_activity() {
                        info!(summary = ?settled, "Monitor activity");
                    }
                    let started = Instant::now();
                    settled = TickSummary {
                        skipped_in_flight: self.spawn_evaluations(&mut in_flight),
                        ..Default::default()
                    };
                    Metrics::monitor_tick(started.elapsed().as_secs_f64() * 1000.0);
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            settled.record_joined(joined);
        }
        if settled.has_activity() {
            info!(summary = ?settled, "Monitor activity");
        }
    }

    /// Evaluate every monitored identity once and wait for all of them to
    /// settle.
    pub async fn tick(&self) -> TickSummary {
        let started = Instant::now();
        let mut tasks = JoinSet::new();
        let mut summary = TickSummary {
            skipped_in_flight: self.spawn_evaluations(&mut tasks),
            ..Default::default()
        };

        while let Some(joined) = tasks.join_next().await {
            summary.record_joined(joined);
        }

        Metrics::monitor_tick(started.elapsed().as_secs_f64() * 1000.0);
        summary
    }

    /// Claim and spawn an evaluation for every identity not already in
    /// flight. Returns the number skipped.
    ///
    /// The claim is taken before anything is awaited; the concurrency
    /// permit is awaited inside the task so spawning never blocks.
    fn spawn_evaluations(&self, tasks: &mut JoinSet<Outcome>) -> usize {
        let mut skipped = 0;

        for key in self.store.snapshot_keys() {
            let Some(guard) = self.store.try_begin_exit(&key) else {
                debug!(position = %key, "Exit in flight, skipping");
                skipped += 1;
                continue;
            };

            let this = self.clone();
            tasks.spawn(async move {
                let _permit = match Arc::clone(&this.permits).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!(error = %e, "Evaluation semaphore closed");
                        return Outcome::Cancelled;
                    }
                };
                let result = this.evaluate(&key).await;
                let outcome = this.settle(&key, result);
                drop(guard);
                outcome
            });
        }

        skipped
    }

    async fn evaluate(&self, key: &PositionKey) -> MonitorResult<Outcome> {
        let Some(price) = self
            .prices
            .current_price(&key.asset)
            .await
            .filter(Price::is_positive)
        else {
            debug!(position = %key, "Price unavailable, skipping");
            Metrics::price_unavailable();
            return Ok(Outcome::PriceUnavailable);
        };

        let Some(position) = self.store.update_high_water_mark(key, price) else {
            return Ok(Outcome::Gone);
        };

        match position.exit_reason(price) {
            Some(reason) => self.execute_exit(&position, reason, price).await,
            None => Ok(Outcome::Hold),
        }
    }

    async fn execute_exit(
        &self,
        position: &Position,
        reason: ExitReason,
        price: Price,
    ) -> MonitorResult<Outcome> {
        let amount = TokenAmount::from_quantity(position.quantity, position.decimals)?;
        if amount.is_zero() {
            return Err(MonitorError::Evaluation(format!(
                "quantity {} rounds to zero base units at {} decimals",
                position.quantity, position.decimals
            )));
        }

        let wallet = WalletHandle::new(position.wallet.clone(), position.key_ref.clone());
        let slippage = position.slippage.unwrap_or(self.config.default_slippage);

        Metrics::exit_attempt(reason.as_str());
        info!(
            owner = %position.owner(),
            asset = %position.asset(),
            reason = %reason,
            entry = %position.entry_price,
            highest = %position.highest_price_seen,
            price = %price,
            amount = %amount,
            "Exit condition fired, selling"
        );

        let result = self
            .dispatcher
            .execute_swap(
                position.asset(),
                &self.config.exit_asset,
                amount,
                &wallet,
                slippage,
                true,
            )
            .await;

        match result {
            Ok(swap) => {
                let store = Arc::clone(&self.store);
                let key = position.key.clone();
                match tokio::task::spawn_blocking(move || store.mark_exited(&key)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!(
                        owner = %position.owner(),
                        asset = %position.asset(),
                        error = %e,
                        "Exit confirmed but not persisted"
                    ),
                    Err(e) => error!(
                        owner = %position.owner(),
                        asset = %position.asset(),
                        error = %e,
                        "Exit confirmed but ledger task failed"
                    ),
                }
                Metrics::exit_success(&swap.provider_name, reason.as_str());
                info!(
                    owner = %position.owner(),
                    asset = %position.asset(),
                    reason = %reason,
                    provider = %swap.provider_name,
                    signature = %swap.signature,
                    received = %swap.received_amount,
                    "Position exited"
                );

                self.sink.emit(&MonitorEvent::Exited(ExitEvent {
                    owner: position.owner().clone(),
                    asset: position.asset().clone(),
                    rule_id: position.rule_id.clone(),
                    quantity: position.quantity,
                    exit_reason: reason,
                    entry_price: position.entry_price,
                    exit_price: price,
                    received_amount: swap.received_amount,
                    provider: swap.provider,
                    provider_name: swap.provider_name,
                    signature: swap.signature,
                    exited_at: Utc::now(),
                }));
                Ok(Outcome::Exited)
            }
            Err(SwapError::Cancelled) => {
                debug!(position = %position.key, "Exit cancelled by shutdown");
                Ok(Outcome::Cancelled)
            }
            Err(SwapError::InvalidInput(message)) => Err(MonitorError::Evaluation(format!(
                "swap request rejected: {message}"
            ))),
            Err(e) => {
                Metrics::exit_failure(reason.as_str());
                warn!(
                    owner = %position.owner(),
                    asset = %position.asset(),
                    reason = %reason,
                    error = %e,
                    "Exit failed, will retry next tick"
                );
                self.sink.emit(&MonitorEvent::ExitFailed {
                    owner: position.owner().clone(),
                    asset: position.asset().clone(),
                    exit_reason: reason,
                    will_retry: true,
                    message: e.to_string(),
                });
                Ok(Outcome::ExitFailed)
            }
        }
    }

    /// Apply the unexpected-error policy to an evaluation result.
    fn settle(&self, key: &PositionKey, result: MonitorResult<Outcome>) -> Outcome {
        let error = match result {
            Ok(Outcome::PriceUnavailable) => return Outcome::PriceUnavailable,
            Ok(outcome) => {
                self.unexpected.remove(key);
                return outcome;
            }
            Err(e) => e,
        };

        let consecutive = {
            let mut count = self.unexpected.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let message = error.to_string();

        if consecutive >= self.config.max_unexpected_errors {
            self.unexpected.remove(key);
            self.store.evict(key);
            Metrics::position_evicted();
            error!(
                owner = %key.owner,
                asset = %key.asset,
                consecutive,
                error = %message,
                "Evicting position after repeated unexpected errors"
            );
            self.sink.emit(&MonitorEvent::Evicted {
                owner: key.owner.clone(),
                asset: key.asset.clone(),
                message,
            });
            Outcome::Evicted
        } else {
            Metrics::needs_attention();
            warn!(
                owner = %key.owner,
                asset = %key.asset,
                consecutive,
                error = %message,
                "Position needs attention"
            );
            self.sink.emit(&MonitorEvent::NeedsAttention {
                owner: key.owner.clone(),
                asset: key.asset.clone(),
                consecutive_errors: consecutive,
                message,
            });
            Outcome::NeedsAttention
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{MockPriceSource, RecordingSink};
    use autoexit_core::{ExitConditions, ManualClock, OwnerId, Quantity};
    use autoexit_persistence::MemoryExitedLedger;
    use autoexit_position::ExitPolicy;
    use autoexit_swap::{
        DispatcherSettings, MockSwapProvider, ProviderError, ProviderErrorKind, ProviderKind,
        RetryPolicy,
    };
    use mockall::Sequence;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const BONK: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";

    struct Harness {
        store: Arc<PositionStore>,
        ledger: Arc<MemoryExitedLedger>,
        primary: Arc<MockSwapProvider>,
        secondary: Arc<MockSwapProvider>,
        sink: Arc<RecordingSink>,
        dispatcher: Arc<SwapDispatcher>,
    }

    impl Harness {
        fn new() -> Self {
            let ledger = Arc::new(MemoryExitedLedger::new());
            let store = Arc::new(PositionStore::new(ledger.clone()));
            let primary = Arc::new(MockSwapProvider::new(ProviderKind::Primary, "aggregator"));
            let secondary = Arc::new(MockSwapProvider::new(ProviderKind::Secondary, "router"));
            let dispatcher = Arc::new(SwapDispatcher::new(
                vec![primary.clone(), secondary.clone()],
                DispatcherSettings {
                    retry: RetryPolicy {
                        max_attempts: 1,
                        base_backoff: Duration::from_millis(1),
                    },
                    min_interval: Duration::ZERO,
                    breaker_threshold: 100,
                    breaker_timeout: Duration::from_secs(60),
                },
                Arc::new(ManualClock::new()),
                CancellationToken::new(),
            ));
            Self {
                store,
                ledger,
                primary,
                secondary,
                sink: Arc::new(RecordingSink::new()),
                dispatcher,
            }
        }

        fn monitor(&self, prices: MockPriceSource, max_unexpected_errors: u32) -> PositionMonitor {
            PositionMonitor::new(
                self.store.clone(),
                self.dispatcher.clone(),
                Arc::new(prices),
                self.sink.clone(),
                MonitorConfig {
                    max_unexpected_errors,
                    ..Default::default()
                },
            )
        }

        fn admit(&self, conditions: ExitConditions, quantity: Decimal, decimals: u8) -> PositionKey {
            let policy = ExitPolicy {
                owner: OwnerId::new("7"),
                rule_id: "rule-1".to_string(),
                wallet: Address::native_mint(),
                key_ref: "wallet-7".to_string(),
                conditions,
                slippage: None,
            };
            let position = Position::new(
                Address::parse(BONK).unwrap(),
                &policy,
                Price::new(dec!(1.0)),
                Quantity::new(quantity),
                decimals,
                None,
            )
            .unwrap();
            let key = position.key.clone();
            assert!(self.store.admit(position));
            key
        }

        fn admit_asset(&self, asset: &Address, conditions: ExitConditions) -> PositionKey {
            let policy = ExitPolicy {
                owner: OwnerId::new("7"),
                rule_id: "rule-1".to_string(),
                wallet: Address::native_mint(),
                key_ref: "wallet-7".to_string(),
                conditions,
                slippage: None,
            };
            let position = Position::new(
                asset.clone(),
                &policy,
                Price::new(dec!(1.0)),
                Quantity::new(dec!(1000)),
                6,
                None,
            )
            .unwrap();
            let key = position.key.clone();
            assert!(self.store.admit(position));
            key
        }
    }

    fn tp_sl(tp: Decimal, sl: Decimal) -> ExitConditions {
        ExitConditions {
            take_profit_pct: Some(tp),
            stop_loss_pct: Some(sl),
            trailing_stop_pct: None,
        }
    }

    fn price_path(path: &[Option<Decimal>]) -> MockPriceSource {
        let mut prices = MockPriceSource::new();
        let mut seq = Sequence::new();
        for step in path.iter().copied() {
            prices
                .expect_current_price()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_| Box::pin(async move { step.map(Price::new) }));
        }
        prices
    }

    #[tokio::test]
    async fn test_stop_loss_scenario_fires_at_boundary() {
        let h = Harness::new();
        let key = h.admit(tp_sl(dec!(20), dec!(5)), dec!(1000), 6);
        let monitor = h.monitor(price_path(&[Some(dec!(1.0)), Some(dec!(1.1)), Some(dec!(0.95))]), 3);

        assert_eq!(monitor.tick().await.exited, 0);
        assert_eq!(monitor.tick().await.exited, 0);
        assert_eq!(
            h.store.get(&key).unwrap().highest_price_seen,
            Price::new(dec!(1.1))
        );

        let summary = monitor.tick().await;
        assert_eq!(summary.exited, 1);
        assert!(!h.store.contains(&key));
        assert!(h.ledger.contains(&key));

        let exits = h.sink.of_kind("exited");
        assert_eq!(exits.len(), 1);
        match &exits[0] {
            MonitorEvent::Exited(e) => {
                assert_eq!(e.exit_reason, ExitReason::StopLoss);
                assert_eq!(e.provider, ProviderKind::Primary);
                assert_eq!(e.exit_price, Price::new(dec!(0.95)));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wider_stop_loss_holds_at_same_price() {
        let h = Harness::new();
        let key = h.admit(tp_sl(dec!(20), dec!(10)), dec!(1000), 6);
        let monitor = h.monitor(price_path(&[Some(dec!(1.0)), Some(dec!(1.1)), Some(dec!(0.95))]), 3);

        for _ in 0..3 {
            monitor.tick().await;
        }
        assert!(h.store.contains(&key));
        assert_eq!(h.primary.quote_calls(), 0);
    }

    #[tokio::test]
    async fn test_take_profit_precedes_trailing_stop() {
        let h = Harness::new();
        h.admit(
            ExitConditions {
                take_profit_pct: Some(dec!(10)),
                stop_loss_pct: None,
                trailing_stop_pct: Some(dec!(5)),
            },
            dec!(10),
            6,
        );
        // Highest at 1.5: a price of 1.2 clears take-profit (>= 1.1) and
        // trailing-stop (<= 1.425) together.
        h.store
            .update_high_water_mark(&h.store.snapshot_keys()[0], Price::new(dec!(1.5)));
        let monitor = h.monitor(price_path(&[Some(dec!(1.2))]), 3);

        assert_eq!(monitor.tick().await.exited, 1);

        match &h.sink.of_kind("exited")[0] {
            MonitorEvent::Exited(e) => assert_eq!(e.exit_reason, ExitReason::TakeProfit),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_price_is_not_an_error() {
        let h = Harness::new();
        let key = h.admit(tp_sl(dec!(20), dec!(5)), dec!(1000), 6);
        let monitor = h.monitor(price_path(&[None, None, None, None]), 1);

        for _ in 0..4 {
            let summary = monitor.tick().await;
            assert_eq!(summary.price_unavailable, 1);
        }
        assert!(h.store.contains(&key));
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_failed_exit_keeps_position_for_next_tick() {
        let h = Harness::new();
        let key = h.admit(tp_sl(dec!(20), dec!(5)), dec!(1000), 6);
        h.primary
            .push_quote_error(ProviderError::new(ProviderErrorKind::NoRouteOrLiquidity, "no route"));
        h.secondary
            .push_quote_error(ProviderError::new(ProviderErrorKind::InsufficientFunds, "broke"));
        let monitor = h.monitor(price_path(&[Some(dec!(0.9)), Some(dec!(0.9))]), 3);

        let first = monitor.tick().await;
        assert_eq!(first.exit_failed, 1);
        assert!(h.store.contains(&key));
        assert!(!h.store.is_exit_pending(&key));

        let failed = h.sink.of_kind("exit_failed");
        match &failed[0] {
            MonitorEvent::ExitFailed {
                will_retry, message, ..
            } => {
                assert!(*will_retry);
                assert!(message.contains("no route"));
                assert!(message.contains("broke"));
            }
            other => panic!("unexpected event {other:?}"),
        }

        let second = monitor.tick().await;
        assert_eq!(second.exited, 1);
        assert!(!h.store.contains(&key));
    }

    #[tokio::test]
    async fn test_unexpected_errors_alert_then_evict() {
        let h = Harness::new();
        // Rounds to zero base units at 2 decimals.
        let key = h.admit(tp_sl(dec!(20), dec!(5)), dec!(0.001), 2);
        let monitor = h.monitor(price_path(&[Some(dec!(0.5)); 3]), 3);

        assert_eq!(monitor.tick().await.needs_attention, 1);
        assert_eq!(monitor.tick().await.needs_attention, 1);
        assert!(h.store.contains(&key));

        assert_eq!(monitor.tick().await.evicted, 1);
        assert!(!h.store.contains(&key));
        assert!(!h.ledger.contains(&key));

        let kinds: Vec<_> = h.sink.events().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["needs_attention", "needs_attention", "evicted"]);
        assert_eq!(h.primary.quote_calls(), 0);
    }

    #[tokio::test]
    async fn test_eviction_limit_of_one_evicts_immediately() {
        let h = Harness::new();
        let key = h.admit(tp_sl(dec!(20), dec!(5)), dec!(0.001), 2);
        let monitor = h.monitor(price_path(&[Some(dec!(0.5))]), 1);

        assert_eq!(monitor.tick().await.evicted, 1);
        assert!(!h.store.contains(&key));
    }

    #[tokio::test]
    async fn test_skips_identity_with_exit_in_flight() {
        let h = Harness::new();
        let key = h.admit(tp_sl(dec!(20), dec!(5)), dec!(1000), 6);
        let monitor = h.monitor(MockPriceSource::new(), 3);

        let _guard = h.store.try_begin_exit(&key).unwrap();
        let summary = monitor.tick().await;
        assert_eq!(summary.skipped_in_flight, 1);
        assert_eq!(summary.evaluated, 0);
    }

    #[tokio::test]
    async fn test_slow_exit_does_not_stall_other_positions() {
        const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

        let h = Harness::new();
        let bonk = Address::parse(BONK).unwrap();
        let usdc = Address::parse(USDC).unwrap();
        let selling = h.admit(tp_sl(dec!(20), dec!(5)), dec!(1000), 6);
        let holding = h.admit_asset(&usdc, tp_sl(dec!(20), dec!(5)));
        // Quote, submit and confirm each take 300ms.
        h.primary.set_delay(Duration::from_millis(300));

        let usdc_checks = Arc::new(AtomicUsize::new(0));
        let mut prices = MockPriceSource::new();
        let counter = usdc_checks.clone();
        prices.expect_current_price().returning(move |asset| {
            let price = if *asset == bonk {
                dec!(0.5)
            } else {
                counter.fetch_add(1, Ordering::SeqCst);
                dec!(1.0)
            };
            Box::pin(async move { Some(Price::new(price)) })
        });

        let monitor = PositionMonitor::new(
            h.store.clone(),
            h.dispatcher.clone(),
            Arc::new(prices),
            h.sink.clone(),
            MonitorConfig {
                tick_interval: Duration::from_millis(20),
                ..Default::default()
            },
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(h.store.is_exit_pending(&selling));
        let checks = usdc_checks.load(Ordering::SeqCst);
        assert!(checks >= 10, "holding position only checked {checks} times");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("monitor should drain and stop")
            .unwrap();

        // The in-flight exit settled during shutdown, and was sold once.
        assert_eq!(h.primary.quote_calls(), 1);
        assert!(!h.store.contains(&selling));
        assert!(h.store.contains(&holding));
        assert_eq!(h.sink.of_kind("exited").len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let h = Harness::new();
        let monitor = h.monitor(MockPriceSource::new(), 3);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor.run(cancel.clone()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor should stop")
            .unwrap();
    }
}
