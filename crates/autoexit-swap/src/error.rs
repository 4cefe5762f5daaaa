//! Swap error types and provider error classification.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::ProviderAttempt;

/// Classification of a single provider failure.
///
/// Drives the dispatcher: which failures are retried within a provider,
/// which switch transaction format, and which fall through to the next
/// provider immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Rejected before any network call.
    InvalidInput,
    /// Provider throttled us; retry after the suggested delay.
    RateLimited { retry_after: Option<Duration> },
    /// Provider rejected the transaction format; retry with the alternate one.
    VersionOrProtocolMismatch,
    /// No route or not enough liquidity for this pair on this provider.
    NoRouteOrLiquidity,
    /// Wallet cannot cover the swap.
    InsufficientFunds,
    /// Transaction landed but did not move the expected balances.
    OnChainFailure,
    /// Confirmation not observed in time.
    Timeout,
    /// Transient transport failure (connect, reset, 5xx).
    Network,
    Unknown,
}

impl ProviderErrorKind {
    /// Short label for metrics and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::InvalidInput => "invalid_input",
            ProviderErrorKind::RateLimited { .. } => "rate_limited",
            ProviderErrorKind::VersionOrProtocolMismatch => "version_mismatch",
            ProviderErrorKind::NoRouteOrLiquidity => "no_route",
            ProviderErrorKind::InsufficientFunds => "insufficient_funds",
            ProviderErrorKind::OnChainFailure => "on_chain_failure",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Network => "network",
            ProviderErrorKind::Unknown => "unknown",
        }
    }

    /// Retried within the same provider with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderErrorKind::RateLimited { .. } | ProviderErrorKind::Network
        )
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::RateLimited {
                retry_after: Some(d),
            } => write!(f, "rate_limited(retry_after={}ms)", d.as_millis()),
            other => f.write_str(other.as_str()),
        }
    }
}

/// A classified provider failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidInput, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Network, message)
    }

    pub fn on_chain(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::OnChainFailure, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unknown, message)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            // Request-level timeout, not confirmation timeout: the call may be retried.
            Self::network(format!("request timed out: {e}"))
        } else if e.is_connect() || e.is_request() {
            Self::network(e.to_string())
        } else if e.is_decode() {
            Self::unknown(format!("malformed response: {e}"))
        } else {
            Self::network(e.to_string())
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Dispatcher-level errors.
#[derive(Debug, Error)]
pub enum SwapError {
    #[error("Invalid swap request: {0}")]
    InvalidInput(String),

    #[error("{}", format_attempts(.attempts))]
    AllProvidersFailed { attempts: Vec<ProviderAttempt> },

    #[error("Swap cancelled by shutdown")]
    Cancelled,
}

impl SwapError {
    /// Attempts recorded before giving up, if any.
    #[must_use]
    pub fn attempts(&self) -> &[ProviderAttempt] {
        match self {
            SwapError::AllProvidersFailed { attempts } => attempts,
            _ => &[],
        }
    }
}

fn format_attempts(attempts: &[ProviderAttempt]) -> String {
    let mut out = String::from("All providers failed");
    for attempt in attempts {
        out.push_str("\n  - ");
        out.push_str(&attempt.to_string());
    }
    out
}

pub type DispatchResult<T> = Result<T, SwapError>;

/// Classify a failed HTTP response from a provider or signer.
#[must_use]
pub fn classify_http(
    status: reqwest::StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> ProviderError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return ProviderError::new(
            ProviderErrorKind::RateLimited { retry_after },
            format!("HTTP {status}: {body}"),
        );
    }

    let kind = classify_message(body);
    if kind != ProviderErrorKind::Unknown {
        return ProviderError::new(kind, format!("HTTP {status}: {body}"));
    }

    if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT {
        return ProviderError::network(format!("HTTP {status}: {body}"));
    }

    ProviderError::unknown(format!("HTTP {status}: {body}"))
}

/// Classify a provider or chain error message by its content.
#[must_use]
pub fn classify_message(message: &str) -> ProviderErrorKind {
    let lower = message.to_ascii_lowercase();

    const NO_ROUTE: &[&str] = &[
        "could_not_find_any_route",
        "no route",
        "route not found",
        "route_not_found",
        "insufficient liquidity",
        "not enough liquidity",
        "pool not found",
        "token_not_tradable",
    ];
    const FUNDS: &[&str] = &[
        "insufficient funds",
        "insufficient lamports",
        "insufficient balance",
        "0x1", // spl-token InsufficientFunds custom error
    ];
    const VERSION: &[&str] = &[
        "versioned transaction",
        "transaction version",
        "unsupported version",
        "transaction too large",
        "legacy",
        "address lookup table",
    ];
    const RATE: &[&str] = &["rate limit", "too many requests"];

    if NO_ROUTE.iter().any(|p| lower.contains(p)) {
        ProviderErrorKind::NoRouteOrLiquidity
    } else if FUNDS.iter().any(|p| contains_token(&lower, p)) {
        ProviderErrorKind::InsufficientFunds
    } else if VERSION.iter().any(|p| lower.contains(p)) {
        ProviderErrorKind::VersionOrProtocolMismatch
    } else if RATE.iter().any(|p| lower.contains(p)) {
        ProviderErrorKind::RateLimited { retry_after: None }
    } else {
        ProviderErrorKind::Unknown
    }
}

/// Substring match; short hex codes must stand alone to avoid matching "0x1f".
fn contains_token(haystack: &str, needle: &str) -> bool {
    if !needle.starts_with("0x") {
        return haystack.contains(needle);
    }
    haystack
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| word == needle)
}
