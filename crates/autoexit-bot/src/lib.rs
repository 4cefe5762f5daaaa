//! Automated exit bot.
//!
//! Wires the position monitor, discovery loop and fallback swap
//! dispatcher to their external collaborators:
//! - price API, chain RPC and remote signer over HTTP
//! - exit policies from configuration
//! - buy events from a JSON Lines feed
//! - exit events to the log and a daily journal

pub mod adapters;
pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
