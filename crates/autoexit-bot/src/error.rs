//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] autoexit_core::CoreError),

    #[error("Provider setup error: {0}")]
    Provider(#[from] autoexit_swap::ProviderError),

    #[error("Position error: {0}")]
    Position(#[from] autoexit_position::PositionError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] autoexit_telemetry::TelemetryError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] autoexit_persistence::PersistenceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
