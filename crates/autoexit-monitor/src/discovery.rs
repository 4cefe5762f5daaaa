//! Discovery loop.
//!
//! Brings newly acquired assets under monitoring. For every owner with an
//! exit policy, two independent paths feed `PositionStore::admit`:
//!
//! - buy events recorded since the previous pass
//! - current wallet balances, for buys the event feed missed or delayed
//!
//! Both rely on `admit` being idempotent and on the exited veto, so an
//! asset seen by both paths is admitted once and an exited asset never
//! comes back.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use autoexit_core::{Address, PositionKey, Price};
use autoexit_position::{ExitPolicy, Position, PositionStore};
use autoexit_telemetry::Metrics;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sources::{DynBalanceSource, DynBuyEventSource, DynExitPolicySource, DynPriceSource};

const PATH_BUY_EVENT: &str = "buy_event";
const PATH_BALANCE: &str = "balance";

/// Discovery loop tuning.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub tick_interval: Duration,
    /// How far back the first pass reads buy events.
    pub buy_lookback: Duration,
    /// Assets never admitted (quote assets, stablecoins held as cash).
    pub ignored_assets: HashSet<Address>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(10_000),
            buy_lookback: Duration::from_secs(3600),
            ignored_assets: HashSet::new(),
        }
    }
}

/// Admissions per path for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoverySummary {
    pub owners: usize,
    pub from_buy_events: usize,
    pub from_balances: usize,
    pub source_errors: usize,
}

/// Slow loop that admits new positions.
pub struct DiscoveryLoop {
    store: Arc<PositionStore>,
    policies: DynExitPolicySource,
    buys: DynBuyEventSource,
    balances: DynBalanceSource,
    prices: DynPriceSource,
    config: DiscoveryConfig,
    /// Start of the buy-event window for the next pass.
    buys_since: Mutex<Option<DateTime<Utc>>>,
}

impl DiscoveryLoop {
    pub fn new(
        store: Arc<PositionStore>,
        policies: DynExitPolicySource,
        buys: DynBuyEventSource,
        balances: DynBalanceSource,
        prices: DynPriceSource,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            store,
            policies,
            buys,
            balances,
            prices,
            config,
            buys_since: Mutex::new(None),
        }
    }

    /// Run passes until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            tick_ms = self.config.tick_interval.as_millis() as u64,
            lookback_s = self.config.buy_lookback.as_secs(),
            ignored = self.config.ignored_assets.len(),
            "DiscoveryLoop started"
        );

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("DiscoveryLoop stopping");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let summary = self.tick().await;
            if summary.from_buy_events + summary.from_balances > 0 {
                info!(?summary, "Discovery pass admitted positions");
            }
        }
    }

    /// One discovery pass over every owner with a policy.
    pub async fn tick(&self) -> DiscoverySummary {
        let mut summary = DiscoverySummary::default();
        let pass_started = Utc::now();

        let policies = match self.policies.policies().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Failed to load exit policies");
                summary.source_errors += 1;
                return summary;
            }
        };

        let since = (*self.buys_since.lock()).unwrap_or_else(|| {
            pass_started
                - chrono::Duration::from_std(self.config.buy_lookback)
                    .unwrap_or_else(|_| chrono::Duration::hours(1))
        });
        let mut buy_errors = 0;

        for policy in &policies {
            summary.owners += 1;

            match self.admit_from_buys(policy, since).await {
                Ok(n) => summary.from_buy_events += n,
                Err(()) => buy_errors += 1,
            }
            match self.admit_from_balances(policy).await {
                Ok(n) => summary.from_balances += n,
                Err(()) => summary.source_errors += 1,
            }
        }

        summary.source_errors += buy_errors;
        // Keep the window open over a failed read so those buys are not lost.
        if buy_errors == 0 {
            *self.buys_since.lock() = Some(pass_started);
        }
        summary
    }

    async fn admit_from_buys(
        &self,
        policy: &ExitPolicy,
        since: DateTime<Utc>,
    ) -> Result<usize, ()> {
        let events = self
            .buys
            .buys_since(&policy.owner, since)
            .await
            .map_err(|e| {
                warn!(owner = %policy.owner, error = %e, "Buy event query failed");
            })?;

        let mut admitted = 0;
        for event in events {
            if !self.is_candidate(policy, &event.asset) {
                continue;
            }
            let current = self.prices.current_price(&event.asset).await;
            let position = match Position::new(
                event.asset.clone(),
                policy,
                event.entry_price,
                event.quantity,
                event.decimals,
                current,
            ) {
                Ok(p) => p,
                Err(e) => {
                    warn!(owner = %policy.owner, asset = %event.asset, error = %e, "Skipping buy event");
                    continue;
                }
            };
            if self.store.admit(position) {
                Metrics::discovery_admitted(PATH_BUY_EVENT);
                admitted += 1;
            }
        }
        Ok(admitted)
    }

    async fn admit_from_balances(&self, policy: &ExitPolicy) -> Result<usize, ()> {
        let holdings = self.balances.holdings(&policy.wallet).await.map_err(|e| {
            warn!(owner = %policy.owner, wallet = %policy.wallet, error = %e, "Balance query failed");
        })?;

        let mut admitted = 0;
        for holding in holdings {
            if !holding.quantity.is_positive() || !self.is_candidate(policy, &holding.asset) {
                continue;
            }
            // No buy record, so the current price stands in as entry.
            let Some(price) = self
                .prices
                .current_price(&holding.asset)
                .await
                .filter(Price::is_positive)
            else {
                debug!(owner = %policy.owner, asset = %holding.asset, "No price for held asset, deferring");
                continue;
            };
            let position = match Position::new(
                holding.asset.clone(),
                policy,
                price,
                holding.quantity,
                holding.decimals,
                Some(price),
            ) {
                Ok(p) => p,
                Err(e) => {
                    warn!(owner = %policy.owner, asset = %holding.asset, error = %e, "Skipping holding");
                    continue;
                }
            };
            if self.store.admit(position) {
                Metrics::discovery_admitted(PATH_BALANCE);
                admitted += 1;
            }
        }
        Ok(admitted)
    }

    /// Cheap pre-checks before pricing an asset. `admit` re-checks under lock.
    fn is_candidate(&self, policy: &ExitPolicy, asset: &Address) -> bool {
        if asset.is_native() || self.config.ignored_assets.contains(asset) {
            return false;
        }
        let key = PositionKey::new(policy.owner.clone(), asset.clone());
        !self.store.contains(&key) && !self.store.is_exited(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{BuyEvent, FixedPrices, Holding, StaticBalances, StaticBuyEvents, StaticPolicySource};
    use autoexit_core::{ExitConditions, OwnerId, Quantity};
    use autoexit_persistence::MemoryExitedLedger;
    use rust_decimal_macros::dec;

    const BONK: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";
    const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
    const WALLET: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

    struct Harness {
        store: Arc<PositionStore>,
        buys: Arc<StaticBuyEvents>,
        balances: Arc<StaticBalances>,
        prices: Arc<FixedPrices>,
        discovery: DiscoveryLoop,
    }

    fn policy() -> ExitPolicy {
        ExitPolicy {
            owner: OwnerId::new("7"),
            rule_id: "rule-1".to_string(),
            wallet: Address::parse(WALLET).unwrap(),
            key_ref: "wallet-7".to_string(),
            conditions: ExitConditions {
                trailing_stop_pct: Some(dec!(10)),
                ..Default::default()
            },
            slippage: None,
        }
    }

    fn harness(ignored: &[&str]) -> Harness {
        let store = Arc::new(PositionStore::new(Arc::new(MemoryExitedLedger::new())));
        let buys = Arc::new(StaticBuyEvents::new());
        let balances = Arc::new(StaticBalances::new());
        let prices = Arc::new(FixedPrices::new());
        let discovery = DiscoveryLoop::new(
            store.clone(),
            Arc::new(StaticPolicySource::new(vec![policy()])),
            buys.clone(),
            balances.clone(),
            prices.clone(),
            DiscoveryConfig {
                ignored_assets: ignored.iter().map(|a| Address::parse(a).unwrap()).collect(),
                ..Default::default()
            },
        );
        Harness {
            store,
            buys,
            balances,
            prices,
            discovery,
        }
    }

    fn bonk() -> Address {
        Address::parse(BONK).unwrap()
    }

    fn key() -> PositionKey {
        PositionKey::new(OwnerId::new("7"), bonk())
    }

    fn buy(entry: rust_decimal::Decimal) -> BuyEvent {
        BuyEvent {
            owner: OwnerId::new("7"),
            asset: bonk(),
            entry_price: Price::new(entry),
            quantity: Quantity::new(dec!(1000)),
            decimals: 5,
            bought_at: Utc::now(),
            signature: None,
        }
    }

    #[tokio::test]
    async fn test_buy_event_admits_with_high_water_mark_from_price() {
        let h = harness(&[]);
        h.buys.push(buy(dec!(100)));
        h.prices.set(&bonk(), Price::new(dec!(120)));

        let summary = h.discovery.tick().await;
        assert_eq!(summary.from_buy_events, 1);

        let pos = h.store.get(&key()).unwrap();
        assert_eq!(pos.entry_price, Price::new(dec!(100)));
        assert_eq!(pos.highest_price_seen, Price::new(dec!(120)));
        assert_eq!(pos.rule_id, "rule-1");
    }

    #[tokio::test]
    async fn test_both_paths_converge_on_one_position() {
        let h = harness(&[]);
        h.buys.push(buy(dec!(100)));
        h.balances.set(
            &Address::parse(WALLET).unwrap(),
            vec![Holding {
                asset: bonk(),
                quantity: Quantity::new(dec!(1000)),
                decimals: 5,
            }],
        );
        h.prices.set(&bonk(), Price::new(dec!(90)));

        let summary = h.discovery.tick().await;
        assert_eq!(summary.from_buy_events, 1);
        assert_eq!(summary.from_balances, 0);
        assert_eq!(h.store.len(), 1);
        // Buy record wins: entry from the event, not the current price.
        assert_eq!(
            h.store.get(&key()).unwrap().entry_price,
            Price::new(dec!(100))
        );
    }

    #[tokio::test]
    async fn test_balance_path_uses_current_price_as_entry() {
        let h = harness(&[]);
        h.balances.set(
            &Address::parse(WALLET).unwrap(),
            vec![Holding {
                asset: bonk(),
                quantity: Quantity::new(dec!(5)),
                decimals: 5,
            }],
        );

        // No price yet: deferred, not admitted.
        assert_eq!(h.discovery.tick().await.from_balances, 0);

        h.prices.set(&bonk(), Price::new(dec!(2)));
        assert_eq!(h.discovery.tick().await.from_balances, 1);
        assert_eq!(
            h.store.get(&key()).unwrap().entry_price,
            Price::new(dec!(2))
        );
    }

    #[tokio::test]
    async fn test_exited_asset_is_not_rediscovered() {
        let h = harness(&[]);
        h.prices.set(&bonk(), Price::new(dec!(2)));
        h.buys.push(buy(dec!(1)));
        h.discovery.tick().await;
        h.store.mark_exited(&key()).unwrap();

        // Re-bought: both paths see it again.
        h.buys.push(buy(dec!(1)));
        h.balances.set(
            &Address::parse(WALLET).unwrap(),
            vec![Holding {
                asset: bonk(),
                quantity: Quantity::new(dec!(5)),
                decimals: 5,
            }],
        );
        let summary = h.discovery.tick().await;
        assert_eq!(summary.from_buy_events + summary.from_balances, 0);
        assert!(!h.store.contains(&key()));
    }

    #[tokio::test]
    async fn test_ignored_and_native_assets_skipped() {
        let h = harness(&[USDC]);
        let usdc = Address::parse(USDC).unwrap();
        h.prices.set(&usdc, Price::new(dec!(1)));
        h.prices.set(&Address::native_mint(), Price::new(dec!(150)));
        h.balances.set(
            &Address::parse(WALLET).unwrap(),
            vec![
                Holding {
                    asset: usdc,
                    quantity: Quantity::new(dec!(10)),
                    decimals: 6,
                },
                Holding {
                    asset: Address::native_mint(),
                    quantity: Quantity::new(dec!(1)),
                    decimals: 9,
                },
            ],
        );

        assert_eq!(h.discovery.tick().await.from_balances, 0);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_failed_buy_query_keeps_window_open() {
        let h = harness(&[]);
        h.buys.set_fail(true);
        let first = h.discovery.tick().await;
        assert_eq!(first.source_errors, 1);

        // Buy recorded while the source was failing, backdated before the pass.
        let mut late = buy(dec!(1));
        late.bought_at = Utc::now() - chrono::Duration::seconds(30);
        h.buys.push(late);
        h.buys.set_fail(false);
        h.prices.set(&bonk(), Price::new(dec!(1)));

        assert_eq!(h.discovery.tick().await.from_buy_events, 1);
    }
}
