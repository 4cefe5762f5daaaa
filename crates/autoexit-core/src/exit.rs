//! Exit policy: take-profit, stop-loss and trailing-stop thresholds.
//!
//! Evaluation order is fixed: take-profit, then stop-loss, then
//! trailing-stop. The first matching condition wins; there is no
//! combination logic. All boundaries are inclusive.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::Price;
use crate::error::{CoreError, Result};

/// Why a position was exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
}

impl ExitReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TrailingStop => "trailing_stop",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exit policy attached to a position. Percentages are positive, e.g. `20` = 20%.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit_pct: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss_pct: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailing_stop_pct: Option<Decimal>,
}

impl ExitConditions {
    /// Build and validate a policy.
    pub fn new(
        take_profit_pct: Option<Decimal>,
        stop_loss_pct: Option<Decimal>,
        trailing_stop_pct: Option<Decimal>,
    ) -> Result<Self> {
        let conditions = Self {
            take_profit_pct,
            stop_loss_pct,
            trailing_stop_pct,
        };
        conditions.validate()?;
        Ok(conditions)
    }

    /// At least one condition, all positive, downside percentages below 100.
    pub fn validate(&self) -> Result<()> {
        if self.take_profit_pct.is_none()
            && self.stop_loss_pct.is_none()
            && self.trailing_stop_pct.is_none()
        {
            return Err(CoreError::InvalidConditions(
                "at least one exit condition is required".to_string(),
            ));
        }

        let checks = [
            ("take_profit_pct", self.take_profit_pct, None),
            ("stop_loss_pct", self.stop_loss_pct, Some(Decimal::ONE_HUNDRED)),
            (
                "trailing_stop_pct",
                self.trailing_stop_pct,
                Some(Decimal::ONE_HUNDRED),
            ),
        ];

        for (name, value, upper) in checks {
            let Some(pct) = value else { continue };
            if pct <= Decimal::ZERO {
                return Err(CoreError::InvalidConditions(format!(
                    "{name} must be positive, got {pct}"
                )));
            }
            if let Some(limit) = upper {
                if pct >= limit {
                    return Err(CoreError::InvalidConditions(format!(
                        "{name} must be below {limit}, got {pct}"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Price at or above which take-profit fires.
    #[must_use]
    pub fn take_profit_price(&self, entry: Price) -> Option<Price> {
        self.take_profit_pct.map(|pct| entry.scale_pct(pct))
    }

    /// Price at or below which stop-loss fires.
    #[must_use]
    pub fn stop_loss_price(&self, entry: Price) -> Option<Price> {
        self.stop_loss_pct.map(|pct| entry.scale_pct(-pct))
    }

    /// Price at or below which trailing-stop fires.
    #[must_use]
    pub fn trailing_stop_price(&self, highest: Price) -> Option<Price> {
        self.trailing_stop_pct.map(|pct| highest.scale_pct(-pct))
    }

    /// Evaluate the policy against the current price.
    ///
    /// `highest` must already include `current` (the caller raises the
    /// high-water mark before evaluating).
    #[must_use]
    pub fn evaluate(&self, entry: Price, highest: Price, current: Price) -> Option<ExitReason> {
        if self
            .take_profit_price(entry)
            .is_some_and(|threshold| current >= threshold)
        {
            return Some(ExitReason::TakeProfit);
        }

        if self
            .stop_loss_price(entry)
            .is_some_and(|threshold| current <= threshold)
        {
            return Some(ExitReason::StopLoss);
        }

        if self
            .trailing_stop_price(highest)
            .is_some_and(|threshold| current <= threshold)
        {
            return Some(ExitReason::TrailingStop);
        }

        None
    }
}
