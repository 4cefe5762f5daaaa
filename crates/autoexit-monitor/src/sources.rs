//! Collaborator interfaces used by the loops.
//!
//! The monitor reads prices, exit policies, buy events and wallet
//! balances, and writes domain events. It never writes to a source.
//! The in-memory implementations here back tests and dry runs.

use std::collections::HashMap;
use std::sync::Arc;

use autoexit_core::{Address, OwnerId, Price, Quantity};
use autoexit_position::ExitPolicy;
use autoexit_swap::BoxFuture;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, MonitorResult};
use crate::event::MonitorEvent;

/// Current price of an asset.
#[cfg_attr(test, mockall::automock)]
pub trait PriceSource: Send + Sync {
    /// `None` when no price is available right now. Callers skip the
    /// asset for this tick; it is never read as zero.
    fn current_price(&self, asset: &Address) -> BoxFuture<'static, Option<Price>>;
}

/// Owners with at least one exit policy defined.
pub trait ExitPolicySource: Send + Sync {
    fn policies(&self) -> BoxFuture<'_, MonitorResult<Vec<ExitPolicy>>>;
}

/// A recorded purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyEvent {
    pub owner: OwnerId,
    pub asset: Address,
    pub entry_price: Price,
    pub quantity: Quantity,
    pub decimals: u8,
    pub bought_at: DateTime<Utc>,
    #[serde(default)]
    pub signature: Option<String>,
}

/// Recorded purchases, read-only.
pub trait BuyEventSource: Send + Sync {
    /// Buys by `owner` at or after `since`.
    fn buys_since<'a>(
        &'a self,
        owner: &'a OwnerId,
        since: DateTime<Utc>,
    ) -> BoxFuture<'a, MonitorResult<Vec<BuyEvent>>>;
}

/// A non-zero wallet balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holding {
    pub asset: Address,
    pub quantity: Quantity,
    pub decimals: u8,
}

/// Wallet balances, read-only.
pub trait BalanceSource: Send + Sync {
    fn holdings<'a>(&'a self, wallet: &'a Address) -> BoxFuture<'a, MonitorResult<Vec<Holding>>>;
}

/// Receiver of domain events. Delivery and formatting are its concern.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &MonitorEvent);
}

pub type DynPriceSource = Arc<dyn PriceSource>;
pub type DynExitPolicySource = Arc<dyn ExitPolicySource>;
pub type DynBuyEventSource = Arc<dyn BuyEventSource>;
pub type DynBalanceSource = Arc<dyn BalanceSource>;
pub type DynEventSink = Arc<dyn EventSink>;

/// Settable price table.
#[derive(Debug, Default)]
pub struct FixedPrices {
    prices: Mutex<HashMap<Address, Price>>,
}

impl FixedPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, asset: &Address, price: Price) {
        self.prices.lock().insert(asset.clone(), price);
    }

    pub fn clear(&self, asset: &Address) {
        self.prices.lock().remove(asset);
    }
}

impl PriceSource for FixedPrices {
    fn current_price(&self, asset: &Address) -> BoxFuture<'static, Option<Price>> {
        let price = self.prices.lock().get(asset).copied();
        Box::pin(async move { price })
    }
}

/// Fixed list of exit policies, e.g. from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicySource {
    policies: Vec<ExitPolicy>,
}

impl StaticPolicySource {
    pub fn new(policies: Vec<ExitPolicy>) -> Self {
        Self { policies }
    }
}

impl ExitPolicySource for StaticPolicySource {
    fn policies(&self) -> BoxFuture<'_, MonitorResult<Vec<ExitPolicy>>> {
        Box::pin(async move { Ok(self.policies.clone()) })
    }
}

/// In-memory buy events.
#[derive(Debug, Default)]
pub struct StaticBuyEvents {
    events: Mutex<Vec<BuyEvent>>,
    fail: Mutex<bool>,
}

impl StaticBuyEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: BuyEvent) {
        self.events.lock().push(event);
    }

    /// Make subsequent queries fail.
    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

impl BuyEventSource for StaticBuyEvents {
    fn buys_since<'a>(
        &'a self,
        owner: &'a OwnerId,
        since: DateTime<Utc>,
    ) -> BoxFuture<'a, MonitorResult<Vec<BuyEvent>>> {
        Box::pin(async move {
            if *self.fail.lock() {
                return Err(MonitorError::Source("buy events unavailable".to_string()));
            }
            Ok(self
                .events
                .lock()
                .iter()
                .filter(|e| &e.owner == owner && e.bought_at >= since)
                .cloned()
                .collect())
        })
    }
}

/// In-memory wallet balances.
#[derive(Debug, Default)]
pub struct StaticBalances {
    holdings: Mutex<HashMap<Address, Vec<Holding>>>,
}

impl StaticBalances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, wallet: &Address, holdings: Vec<Holding>) {
        self.holdings.lock().insert(wallet.clone(), holdings);
    }
}

impl BalanceSource for StaticBalances {
    fn holdings<'a>(&'a self, wallet: &'a Address) -> BoxFuture<'a, MonitorResult<Vec<Holding>>> {
        Box::pin(async move {
            Ok(self
                .holdings
                .lock()
                .get(wallet)
                .cloned()
                .unwrap_or_default())
        })
    }
}

/// Sink that keeps every event, for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<MonitorEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MonitorEvent> {
        self.events.lock().clone()
    }

    /// Events of one kind (`"exited"`, `"exit_failed"`, ...).
    pub fn of_kind(&self, kind: &str) -> Vec<MonitorEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &MonitorEvent) {
        self.events.lock().push(event.clone());
    }
}
