//! Position store for autoexit.
//!
//! Holds the positions currently under monitoring, keyed by
//! `(owner, asset)`, and the exited set that vetoes re-admission.
//!
//! # Key Components
//!
//! - [`Position`]: a holding with an attached exit policy
//! - [`ExitPolicy`]: per-owner exit rule used to admit new positions
//! - [`PositionStore`]: admission, high-water mark, exit settlement
//! - [`ExitGuard`]: RAII membership in the in-flight exit set

pub mod error;
pub mod position;
pub mod store;

pub use error::{PositionError, PositionResult};
pub use position::{ExitPolicy, Position};
pub use store::{ExitGuard, PositionStore};
