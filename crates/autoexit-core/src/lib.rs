//! Core domain types for the autoexit position monitor.
//!
//! This crate provides the fundamental types shared by every other crate:
//! - `Address`, `OwnerId`, `PositionKey`: identities of wallets, assets and positions
//! - `Price`, `Quantity`: precision-safe decimal types
//! - `TokenAmount`, `SlippageBps`: raw on-chain amounts and swap tolerances
//! - `ExitConditions`, `ExitReason`: exit policy evaluation
//! - `Clock`: injectable monotonic time source

pub mod address;
pub mod clock;
pub mod decimal;
pub mod error;
pub mod exit;

pub use address::{Address, OwnerId, PositionKey, NATIVE_MINT};
pub use clock::{Clock, ManualClock, SystemClock};
pub use decimal::{Price, Quantity, SlippageBps, TokenAmount};
pub use error::{CoreError, Result};
pub use exit::{ExitConditions, ExitReason};
