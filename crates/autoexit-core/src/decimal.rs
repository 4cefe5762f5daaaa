//! Precision-safe decimal types for prices and holdings.
//!
//! Uses `rust_decimal` for exact decimal arithmetic, avoiding
//! floating-point rounding errors in threshold comparisons.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Largest token decimals supported by `TokenAmount` conversions.
const MAX_DECIMALS: u8 = 18;

/// Price of one whole unit of an asset, in quote units.
///
/// Wraps `Decimal` to provide type safety and prevent mixing
/// prices with quantities in calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Price scaled by `(1 + pct/100)`. Negative `pct` scales down.
    #[inline]
    pub fn scale_pct(&self, pct: Decimal) -> Self {
        Self(self.0 * (Decimal::ONE + pct / Decimal::ONE_HUNDRED))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

/// Held quantity in whole units of an asset (decimals already applied).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(pub Decimal);

impl Quantity {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Decimal> for Quantity {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

/// Raw on-chain token amount in base units (e.g. lamports).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TokenAmount(pub u64);

impl TokenAmount {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Convert a whole-unit quantity to base units, truncating dust.
    pub fn from_quantity(quantity: Quantity, decimals: u8) -> Result<Self> {
        if decimals > MAX_DECIMALS {
            return Err(CoreError::InvalidAmount(format!(
                "decimals {decimals} exceeds {MAX_DECIMALS}"
            )));
        }
        if quantity.inner().is_sign_negative() {
            return Err(CoreError::InvalidAmount(format!(
                "negative quantity {quantity}"
            )));
        }

        let scale = Decimal::from(10u64.pow(u32::from(decimals)));
        let raw = quantity
            .inner()
            .checked_mul(scale)
            .ok_or_else(|| CoreError::Overflow(format!("{quantity} * 10^{decimals}")))?
            .trunc();

        raw.to_u64()
            .map(Self)
            .ok_or_else(|| CoreError::Overflow(format!("{raw} does not fit in u64")))
    }

    /// Convert base units back to a whole-unit quantity.
    #[must_use]
    pub fn to_quantity(&self, decimals: u8) -> Quantity {
        Quantity(Decimal::from_i128_with_scale(
            i128::from(self.0),
            u32::from(decimals.min(MAX_DECIMALS)),
        ))
    }

    #[inline]
    pub fn saturating_sub(&self, other: TokenAmount) -> TokenAmount {
        Self(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Slippage tolerance in basis points (100 = 1%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlippageBps(pub u16);

impl SlippageBps {
    /// 100% slippage; anything above is meaningless.
    pub const MAX: Self = Self(10_000);

    #[inline]
    pub fn new(bps: u16) -> Self {
        Self(bps)
    }

    #[inline]
    pub fn get(&self) -> u16 {
        self.0
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.0 <= Self::MAX.0
    }
}

impl Default for SlippageBps {
    fn default() -> Self {
        Self(100)
    }
}

impl fmt::Display for SlippageBps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.0)
    }
}
