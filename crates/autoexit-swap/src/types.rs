//! Swap request, quote and result shapes shared by every provider.

use std::fmt;

use autoexit_core::{Address, SlippageBps, TokenAmount};
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, ProviderResult};

/// Provider slot in the fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Primary,
    Secondary,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Primary => "primary",
            ProviderKind::Secondary => "secondary",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction encoding requested from a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxFormat {
    #[default]
    Versioned,
    Legacy,
}

impl TxFormat {
    /// The format to fall back to after a version mismatch.
    #[must_use]
    pub fn alternate(self) -> Self {
        match self {
            TxFormat::Versioned => TxFormat::Legacy,
            TxFormat::Legacy => TxFormat::Versioned,
        }
    }
}

impl fmt::Display for TxFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxFormat::Versioned => f.write_str("versioned"),
            TxFormat::Legacy => f.write_str("legacy"),
        }
    }
}

/// Opaque handle to a wallet able to sign.
///
/// `key_ref` is passed through to the signer untouched; this crate never
/// sees key material.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletHandle {
    pub address: Address,
    pub key_ref: String,
}

impl WalletHandle {
    pub fn new(address: Address, key_ref: impl Into<String>) -> Self {
        Self {
            address,
            key_ref: key_ref.into(),
        }
    }
}

/// What to swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapRequest {
    pub input: Address,
    pub output: Address,
    pub amount: TokenAmount,
    pub slippage: SlippageBps,
    /// Sells spend an existing token account; buys may need SOL wrapping.
    pub is_sell: bool,
}

impl SwapRequest {
    /// Checks that must pass before any network call.
    pub fn validate(&self) -> ProviderResult<()> {
        if self.amount.is_zero() {
            return Err(ProviderError::invalid_input("amount must be greater than zero"));
        }
        if self.input == self.output {
            return Err(ProviderError::invalid_input(format!(
                "input and output asset are identical ({})",
                self.input
            )));
        }
        if !self.slippage.is_valid() {
            return Err(ProviderError::invalid_input(format!(
                "slippage {} exceeds {}",
                self.slippage,
                SlippageBps::MAX
            )));
        }
        Ok(())
    }
}

/// A provider quote. `route` is the provider's own payload, echoed back on submit.
#[derive(Debug, Clone)]
pub struct Quote {
    pub request: SwapRequest,
    pub out_amount: TokenAmount,
    pub min_out_amount: TokenAmount,
    pub route: serde_json::Value,
}

/// A broadcast transaction awaiting confirmation.
#[derive(Debug, Clone)]
pub struct SubmittedSwap {
    /// Signatures in submission order; the last one settles the swap.
    pub signatures: Vec<String>,
    pub wallet: Address,
    pub input: Address,
    pub output: Address,
    pub pre_input_balance: TokenAmount,
    pub pre_output_balance: TokenAmount,
    pub quoted_out: TokenAmount,
    pub last_valid_block_height: Option<u64>,
    pub format: TxFormat,
}

impl SubmittedSwap {
    #[must_use]
    pub fn signature(&self) -> &str {
        self.signatures.last().map(String::as_str).unwrap_or_default()
    }
}

/// Verified on-chain effect of a swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub signature: String,
    pub input_spent: TokenAmount,
    pub received_amount: TokenAmount,
}

/// Normalized result of a successful swap, regardless of provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapResult {
    pub provider: ProviderKind,
    pub provider_name: String,
    pub signature: String,
    pub input: Address,
    pub output: Address,
    pub amount_in: TokenAmount,
    pub received_amount: TokenAmount,
    pub format: TxFormat,
}

/// How one provider's turn ended.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Failed(ProviderError),
    /// Breaker open; no network call made.
    CircuitOpen,
}

/// One provider's turn within an `execute_swap` call.
#[derive(Debug, Clone)]
pub struct ProviderAttempt {
    pub provider: ProviderKind,
    pub provider_name: String,
    pub input: Address,
    pub output: Address,
    pub amount: TokenAmount,
    pub slippage: SlippageBps,
    pub tries: u32,
    pub outcome: AttemptOutcome,
}

impl fmt::Display for ProviderAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) {} {} -> {} @{} tries={}: ",
            self.provider,
            self.provider_name,
            self.amount,
            self.input.short(),
            self.output.short(),
            self.slippage,
            self.tries,
        )?;
        match &self.outcome {
            AttemptOutcome::Failed(err) => write!(f, "{err}"),
            AttemptOutcome::CircuitOpen => f.write_str("skipped (circuit open)"),
        }
    }
}
