//! Retry policy within a single provider.

use std::time::Duration;

use crate::error::ProviderErrorKind;

/// What to do after a failed try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then try again with the same format.
    Backoff(Duration),
    /// Try again at once with the alternate transaction format.
    SwitchFormat,
    /// Give up on this provider.
    GiveUp,
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before the try after `attempt` (1-based): base, 2x base, 4x base, ...
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1u32 << exp)
    }

    /// Decide after try number `attempt` failed with `kind`.
    #[must_use]
    pub fn decide(&self, attempt: u32, kind: &ProviderErrorKind) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        match kind {
            ProviderErrorKind::RateLimited { retry_after } => {
                let backoff = self.backoff(attempt);
                RetryDecision::Backoff(retry_after.map_or(backoff, |d| d.max(backoff)))
            }
            ProviderErrorKind::Network => RetryDecision::Backoff(self.backoff(attempt)),
            ProviderErrorKind::VersionOrProtocolMismatch => RetryDecision::SwitchFormat,
            _ => RetryDecision::GiveUp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn test_transient_errors_back_off() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(1, &ProviderErrorKind::Network),
            RetryDecision::Backoff(Duration::from_secs(1))
        );
        assert_eq!(
            policy.decide(
                2,
                &ProviderErrorKind::RateLimited {
                    retry_after: Some(Duration::from_secs(5))
                }
            ),
            RetryDecision::Backoff(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_terminal_errors_give_up() {
        let policy = RetryPolicy::default();
        for kind in [
            ProviderErrorKind::NoRouteOrLiquidity,
            ProviderErrorKind::InsufficientFunds,
            ProviderErrorKind::OnChainFailure,
            ProviderErrorKind::Timeout,
            ProviderErrorKind::Unknown,
        ] {
            assert_eq!(policy.decide(1, &kind), RetryDecision::GiveUp);
        }
    }

    #[test]
    fn test_mismatch_switches_format() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(1, &ProviderErrorKind::VersionOrProtocolMismatch),
            RetryDecision::SwitchFormat
        );
    }

    #[test]
    fn test_budget_exhausted() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(3, &ProviderErrorKind::Network),
            RetryDecision::GiveUp
        );
    }
}
