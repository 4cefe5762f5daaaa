//! Prometheus metrics and structured logging for autoexit.
//!
//! - Structured logging with tracing (JSON in production)
//! - Prometheus metrics for the monitor, discovery and swap dispatcher
//! - `/metrics` and `/health` HTTP endpoints

pub mod error;
pub mod logging;
pub mod metrics;
pub mod server;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use server::{create_router, serve_metrics};
