//! Monitored position and the exit policy it is admitted under.

use autoexit_core::{
    Address, ExitConditions, ExitReason, OwnerId, PositionKey, Price, Quantity, SlippageBps,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PositionError, PositionResult};

/// Exit rule an owner has defined. Every asset admitted for the owner
/// inherits these conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitPolicy {
    pub owner: OwnerId,
    pub rule_id: String,
    /// Wallet holding the assets.
    pub wallet: Address,
    /// Opaque reference handed to the signer.
    pub key_ref: String,
    pub conditions: ExitConditions,
    #[serde(default)]
    pub slippage: Option<SlippageBps>,
}

/// A holding with an attached exit policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub key: PositionKey,
    pub rule_id: String,
    pub wallet: Address,
    pub key_ref: String,
    pub conditions: ExitConditions,
    pub slippage: Option<SlippageBps>,
    pub entry_price: Price,
    /// Never below `entry_price`; only moves up.
    pub highest_price_seen: Price,
    pub quantity: Quantity,
    /// Token decimals of the asset, used to convert `quantity` to raw units.
    pub decimals: u8,
    pub admitted_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Create a position for `asset` under `policy`.
    ///
    /// `current_price`, when known, seeds the high-water mark so that a
    /// position discovered after a run-up trails from the current level.
    pub fn new(
        asset: Address,
        policy: &ExitPolicy,
        entry_price: Price,
        quantity: Quantity,
        decimals: u8,
        current_price: Option<Price>,
    ) -> PositionResult<Self> {
        if !entry_price.is_positive() {
            return Err(PositionError::InvalidPosition(format!(
                "entry price must be positive, got {entry_price}"
            )));
        }
        if !quantity.is_positive() {
            return Err(PositionError::InvalidPosition(format!(
                "quantity must be positive, got {quantity}"
            )));
        }
        policy.conditions.validate()?;

        let highest_price_seen = current_price
            .filter(|p| *p > entry_price)
            .unwrap_or(entry_price);

        Ok(Self {
            key: PositionKey::new(policy.owner.clone(), asset),
            rule_id: policy.rule_id.clone(),
            wallet: policy.wallet.clone(),
            key_ref: policy.key_ref.clone(),
            conditions: policy.conditions,
            slippage: policy.slippage,
            entry_price,
            highest_price_seen,
            quantity,
            decimals,
            admitted_at: Utc::now(),
            last_checked_at: None,
        })
    }

    #[inline]
    pub fn owner(&self) -> &OwnerId {
        &self.key.owner
    }

    #[inline]
    pub fn asset(&self) -> &Address {
        &self.key.asset
    }

    /// Raise the high-water mark to `price` if it is higher.
    ///
    /// Returns `true` if the mark moved.
    pub fn observe_price(&mut self, price: Price, at: DateTime<Utc>) -> bool {
        self.last_checked_at = Some(at);
        if price > self.highest_price_seen {
            self.highest_price_seen = price;
            true
        } else {
            false
        }
    }

    /// Exit reason that fires at `current`, if any.
    #[must_use]
    pub fn exit_reason(&self, current: Price) -> Option<ExitReason> {
        self.conditions
            .evaluate(self.entry_price, self.highest_price_seen, current)
    }
}
