//! Position error types.

use autoexit_core::CoreError;
use autoexit_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("Position not found: {0}")]
    NotFound(String),

    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Exited ledger write failed: {0}")]
    Ledger(#[from] PersistenceError),
}

pub type PositionResult<T> = Result<T, PositionError>;
