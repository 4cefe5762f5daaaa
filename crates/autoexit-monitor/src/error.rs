//! Monitor error types.

use autoexit_core::CoreError;
use autoexit_position::PositionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// A collaborator query failed.
    #[error("Source error: {0}")]
    Source(String),

    /// A position could not be evaluated. Counts toward eviction.
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Position(#[from] PositionError),
}

pub type MonitorResult<T> = Result<T, MonitorError>;
