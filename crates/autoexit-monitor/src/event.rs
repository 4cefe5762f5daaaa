//! Domain events emitted to the notification and accounting sink.

use autoexit_core::{Address, ExitReason, OwnerId, Price, Quantity, TokenAmount};
use autoexit_swap::ProviderKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A confirmed exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitEvent {
    pub owner: OwnerId,
    pub asset: Address,
    pub rule_id: String,
    pub quantity: Quantity,
    pub exit_reason: ExitReason,
    pub entry_price: Price,
    pub exit_price: Price,
    /// Output asset received, in raw units.
    pub received_amount: TokenAmount,
    pub provider: ProviderKind,
    pub provider_name: String,
    pub signature: String,
    pub exited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// Exit confirmed on chain; the position is no longer monitored.
    Exited(ExitEvent),

    /// Every provider failed. The position stays monitored and the next
    /// tick tries again.
    ExitFailed {
        owner: OwnerId,
        asset: Address,
        exit_reason: ExitReason,
        will_retry: bool,
        message: String,
    },

    /// Evaluation failed unexpectedly; monitoring continues for now.
    NeedsAttention {
        owner: OwnerId,
        asset: Address,
        consecutive_errors: u32,
        message: String,
    },

    /// Dropped from monitoring after repeated unexpected errors.
    Evicted {
        owner: OwnerId,
        asset: Address,
        message: String,
    },
}

impl MonitorEvent {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorEvent::Exited(_) => "exited",
            MonitorEvent::ExitFailed { .. } => "exit_failed",
            MonitorEvent::NeedsAttention { .. } => "needs_attention",
            MonitorEvent::Evicted { .. } => "evicted",
        }
    }

    #[must_use]
    pub fn owner(&self) -> &OwnerId {
        match self {
            MonitorEvent::Exited(e) => &e.owner,
            MonitorEvent::ExitFailed { owner, .. }
            | MonitorEvent::NeedsAttention { owner, .. }
            | MonitorEvent::Evicted { owner, .. } => owner,
        }
    }

    #[must_use]
    pub fn asset(&self) -> &Address {
        match self {
            MonitorEvent::Exited(e) => &e.asset,
            MonitorEvent::ExitFailed { asset, .. }
            | MonitorEvent::NeedsAttention { asset, .. }
            | MonitorEvent::Evicted { asset, .. } => asset,
        }
    }
}
