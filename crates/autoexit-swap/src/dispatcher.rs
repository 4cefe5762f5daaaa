//! Fallback swap dispatcher.
//!
//! Walks providers in fixed order (primary, then secondary). Each provider
//! is gated by its circuit breaker, spaced by its rate limiter, and given a
//! bounded retry budget. The first confirmed swap wins; if every provider
//! fails the caller gets one aggregated error listing each attempt.

use std::sync::Arc;
use std::time::Duration;

use autoexit_core::{Address, Clock, SlippageBps, TokenAmount};
use autoexit_telemetry::Metrics;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::breaker::{BreakerSnapshot, CircuitBreaker, DEFAULT_THRESHOLD, DEFAULT_TIMEOUT};
use crate::error::{DispatchResult, ProviderError, ProviderErrorKind, SwapError};
use crate::limiter::{cancellable_sleep, MinIntervalLimiter, DEFAULT_MIN_INTERVAL};
use crate::provider::DynSwapProvider;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::types::{
    AttemptOutcome, Confirmation, ProviderAttempt, ProviderKind, SwapRequest, SwapResult, TxFormat,
    WalletHandle,
};

/// Dispatcher tuning.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherSettings {
    pub retry: RetryPolicy,
    pub min_interval: Duration,
    pub breaker_threshold: u32,
    pub breaker_timeout: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            min_interval: DEFAULT_MIN_INTERVAL,
            breaker_threshold: DEFAULT_THRESHOLD,
            breaker_timeout: DEFAULT_TIMEOUT,
        }
    }
}

struct ProviderSlot {
    provider: DynSwapProvider,
    breaker: CircuitBreaker,
    limiter: MinIntervalLimiter,
}

/// How one provider's turn ended, internally.
enum ProviderRun {
    Confirmed {
        confirmation: Confirmation,
        format: TxFormat,
        tries: u32,
    },
    Failed {
        error: ProviderError,
        tries: u32,
    },
    Cancelled,
}

/// Ordered providers with per-provider breaker and limiter.
pub struct SwapDispatcher {
    slots: Vec<ProviderSlot>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl SwapDispatcher {
    /// Build a dispatcher. Providers are ordered by `ProviderKind`
    /// (primary first); equal kinds keep their given order.
    pub fn new(
        mut providers: Vec<DynSwapProvider>,
        settings: DispatcherSettings,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        providers.sort_by_key(|p| p.kind());
        let slots = providers
            .into_iter()
            .map(|provider| ProviderSlot {
                breaker: CircuitBreaker::new(
                    provider.name(),
                    settings.breaker_threshold,
                    settings.breaker_timeout,
                    clock.clone(),
                ),
                limiter: MinIntervalLimiter::new(settings.min_interval, clock.clone()),
                provider,
            })
            .collect();

        Self {
            slots,
            retry: settings.retry,
            cancel,
        }
    }

    /// Provider names in dispatch order.
    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|s| s.provider.name().to_string())
            .collect()
    }

    /// Breaker state of the provider in slot `kind`.
    #[must_use]
    pub fn breaker(&self, kind: ProviderKind) -> Option<BreakerSnapshot> {
        self.slots
            .iter()
            .find(|s| s.provider.kind() == kind)
            .map(|s| s.breaker.snapshot())
    }

    /// Swap `amount` of `input` into `output` for `wallet`.
    pub async fn execute_swap(
        &self,
        input: &Address,
        output: &Address,
        amount: TokenAmount,
        wallet: &WalletHandle,
        slippage: SlippageBps,
        is_sell: bool,
    ) -> DispatchResult<SwapResult> {
        let request = SwapRequest {
            input: input.clone(),
            output: output.clone(),
            amount,
            slippage,
            is_sell,
        };
        request
            .validate()
            .map_err(|e| SwapError::InvalidInput(e.message))?;

        let mut attempts = Vec::with_capacity(self.slots.len());

        for slot in &self.slots {
            let provider = slot.provider.as_ref();
            let attempt = |tries: u32, outcome: AttemptOutcome| ProviderAttempt {
                provider: provider.kind(),
                provider_name: provider.name().to_string(),
                input: request.input.clone(),
                output: request.output.clone(),
                amount: request.amount,
                slippage: request.slippage,
                tries,
                outcome,
            };

            if !slot.breaker.try_acquire() {
                debug!(provider = provider.name(), "Circuit open, skipping provider");
                Metrics::circuit_skipped(provider.name());
                attempts.push(attempt(0, AttemptOutcome::CircuitOpen));
                continue;
            }

            match self.run_provider(slot, &request, wallet).await {
                ProviderRun::Confirmed {
                    confirmation,
                    format,
                    tries,
                } => {
                    slot.breaker.record_success();
                    info!(
                        provider = provider.name(),
                        signature = %confirmation.signature,
                        input = %request.input.short(),
                        output = %request.output.short(),
                        amount = %request.amount,
                        received = %confirmation.received_amount,
                        tries,
                        "Swap confirmed"
                    );
                    return Ok(SwapResult {
                        provider: provider.kind(),
                        provider_name: provider.name().to_string(),
                        signature: confirmation.signature,
                        input: request.input.clone(),
                        output: request.output.clone(),
                        amount_in: request.amount,
                        received_amount: confirmation.received_amount,
                        format,
                    });
                }
                ProviderRun::Failed { error, tries } => {
                    slot.breaker.record_failure();
                    warn!(
                        provider = provider.name(),
                        kind = error.kind.as_str(),
                        error = %error.message,
                        tries,
                        "Provider failed, falling back"
                    );
                    attempts.push(attempt(tries, AttemptOutcome::Failed(error)));
                }
                ProviderRun::Cancelled => {
                    slot.breaker.record_abandoned();
                    return Err(SwapError::Cancelled);
                }
            }
        }

        Err(SwapError::AllProvidersFailed { attempts })
    }

    async fn run_provider(
        &self,
        slot: &ProviderSlot,
        request: &SwapRequest,
        wallet: &WalletHandle,
    ) -> ProviderRun {
        let provider = slot.provider.as_ref();
        let mut format = TxFormat::default();
        let mut tries = 0u32;

        loop {
            tries += 1;
            if slot.limiter.acquire(&self.cancel).await.is_err() {
                return ProviderRun::Cancelled;
            }

            let error = match self.try_once(slot, request, wallet, format).await {
                Ok(confirmation) => {
                    return ProviderRun::Confirmed {
                        confirmation,
                        format,
                        tries,
                    }
                }
                Err(error) => error,
            };
            Metrics::provider_failure(provider.name(), error.kind.as_str());

            match self.retry.decide(tries, &error.kind) {
                RetryDecision::Backoff(delay) => {
                    debug!(
                        provider = provider.name(),
                        kind = error.kind.as_str(),
                        delay_ms = delay.as_millis() as u64,
                        tries,
                        "Transient provider error, backing off"
                    );
                    if cancellable_sleep(delay, &self.cancel).await.is_err() {
                        return ProviderRun::Cancelled;
                    }
                }
                RetryDecision::SwitchFormat => {
                    let next = format.alternate();
                    debug!(
                        provider = provider.name(),
                        from = %format,
                        to = %next,
                        "Transaction format rejected, retrying with alternate"
                    );
                    format = next;
                }
                RetryDecision::GiveUp => return ProviderRun::Failed { error, tries },
            }
        }
    }

    async fn try_once(
        &self,
        slot: &ProviderSlot,
        request: &SwapRequest,
        wallet: &WalletHandle,
        format: TxFormat,
    ) -> Result<Confirmation, ProviderError> {
        let provider = slot.provider.as_ref();
        let quote = provider.quote(request).await?;

        // A transport failure once signing has started may hide a broadcast
        // transaction, so it is never retried on this provider.
        let submitted = provider
            .build_and_submit(&quote, wallet, format)
            .await
            .map_err(|e| {
                if matches!(e.kind, ProviderErrorKind::Network) {
                    ProviderError::new(
                        ProviderErrorKind::Timeout,
                        format!("submission outcome unknown: {}", e.message),
                    )
                } else {
                    e
                }
            })?;

        // Once broadcast, a transient failure must not trigger a resubmit.
        provider.confirm(&submitted).await.map_err(|e| {
            if e.kind.is_transient() {
                ProviderError::new(
                    ProviderErrorKind::Timeout,
                    format!("confirmation of {} interrupted: {}", submitted.signature(), e.message),
                )
            } else {
                e
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockSwapProvider;
    use autoexit_core::ManualClock;

    const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    fn fast_settings() -> DispatcherSettings {
        DispatcherSettings {
            retry: RetryPolicy {
                max_attempts: 3,
                base_backoff: Duration::from_millis(1),
            },
            min_interval: Duration::ZERO,
            ..DispatcherSettings::default()
        }
    }

    fn setup() -> (Arc<MockSwapProvider>, Arc<MockSwapProvider>, SwapDispatcher) {
        let primary = Arc::new(MockSwapProvider::new(ProviderKind::Primary, "p"));
        let secondary = Arc::new(MockSwapProvider::new(ProviderKind::Secondary, "s"));
        // Given out of order on purpose.
        let dispatcher = SwapDispatcher::new(
            vec![secondary.clone(), primary.clone()],
            fast_settings(),
            Arc::new(ManualClock::new()),
            CancellationToken::new(),
        );
        (primary, secondary, dispatcher)
    }

    async fn sell(dispatcher: &SwapDispatcher) -> DispatchResult<SwapResult> {
        let wallet = WalletHandle::new(Address::native_mint(), "k");
        dispatcher
            .execute_swap(
                &Address::parse(USDC).unwrap(),
                &Address::native_mint(),
                TokenAmount(1_000),
                &wallet,
                SlippageBps(100),
                true,
            )
            .await
    }

    #[tokio::test]
    async fn test_orders_primary_first() {
        let (_, _, dispatcher) = setup();
        assert_eq!(dispatcher.provider_names(), vec!["p", "s"]);
    }

    #[tokio::test]
    async fn test_primary_success_skips_secondary() {
        let (primary, secondary, dispatcher) = setup();
        let result = sell(&dispatcher).await.unwrap();
        assert_eq!(result.provider, ProviderKind::Primary);
        assert_eq!(primary.quote_calls(), 1);
        assert_eq!(secondary.quote_calls(), 0);
    }

    #[tokio::test]
    async fn test_rate_limited_retried_within_provider() {
        let (primary, secondary, dispatcher) = setup();
        primary.push_quote_error(ProviderError::new(
            ProviderErrorKind::RateLimited { retry_after: None },
            "429",
        ));
        primary.push_quote_error(ProviderError::network("reset"));

        let result = sell(&dispatcher).await.unwrap();
        assert_eq!(result.provider, ProviderKind::Primary);
        assert_eq!(primary.quote_calls(), 3);
        assert_eq!(secondary.quote_calls(), 0);
        assert_eq!(dispatcher.breaker(ProviderKind::Primary).unwrap().failure_count, 0);
    }

    #[tokio::test]
    async fn test_no_route_not_retried() {
        let (primary, secondary, dispatcher) = setup();
        primary.push_quote_error(ProviderError::new(ProviderErrorKind::NoRouteOrLiquidity, "none"));

        let result = sell(&dispatcher).await.unwrap();
        assert_eq!(result.provider, ProviderKind::Secondary);
        assert_eq!(primary.quote_calls(), 1);
        assert_eq!(secondary.quote_calls(), 1);
    }

    #[tokio::test]
    async fn test_version_mismatch_switches_format() {
        let (primary, _, dispatcher) = setup();
        primary.push_submit_error(ProviderError::new(
            ProviderErrorKind::VersionOrProtocolMismatch,
            "too large",
        ));

        let result = sell(&dispatcher).await.unwrap();
        assert_eq!(result.provider, ProviderKind::Primary);
        assert_eq!(result.format, TxFormat::Legacy);
        assert_eq!(
            primary.submit_formats(),
            vec![TxFormat::Versioned, TxFormat::Legacy]
        );
    }

    #[tokio::test]
    async fn test_transient_confirm_error_is_not_resubmitted() {
        let (primary, secondary, dispatcher) = setup();
        primary.push_confirm_error(ProviderError::network("rpc down"));

        let result = sell(&dispatcher).await.unwrap();
        assert_eq!(result.provider, ProviderKind::Secondary);
        assert_eq!(primary.submit_formats().len(), 1);
        assert_eq!(secondary.confirm_calls(), 1);
    }

    #[tokio::test]
    async fn test_submit_network_error_is_not_resubmitted() {
        let (primary, secondary, dispatcher) = setup();
        primary.push_submit_error(ProviderError::network("request timed out"));

        let result = sell(&dispatcher).await.unwrap();
        assert_eq!(result.provider, ProviderKind::Secondary);
        assert_eq!(primary.quote_calls(), 1);
        assert_eq!(primary.submit_formats().len(), 1);
        assert_eq!(primary.confirm_calls(), 0);
    }

    #[tokio::test]
    async fn test_submit_rate_limit_is_retried() {
        let (primary, _secondary, dispatcher) = setup();
        primary.push_submit_error(ProviderError::new(
            ProviderErrorKind::RateLimited { retry_after: None },
            "429",
        ));

        let result = sell(&dispatcher).await.unwrap();
        assert_eq!(result.provider, ProviderKind::Primary);
        assert_eq!(primary.submit_formats().len(), 2);
    }

    #[tokio::test]
    async fn test_all_providers_failed_aggregates() {
        let (primary, secondary, dispatcher) = setup();
        primary.push_quote_error(ProviderError::new(ProviderErrorKind::InsufficientFunds, "broke"));
        secondary.push_confirm_error(ProviderError::on_chain("no delta"));

        let err = sell(&dispatcher).await.unwrap_err();
        let attempts = err.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].provider, ProviderKind::Primary);
        assert_eq!(attempts[1].provider, ProviderKind::Secondary);
        let text = err.to_string();
        assert!(text.contains("insufficient_funds"));
        assert!(text.contains("on_chain_failure"));
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_before_providers() {
        let (primary, secondary, dispatcher) = setup();
        let wallet = WalletHandle::new(Address::native_mint(), "k");
        let err = dispatcher
            .execute_swap(
                &Address::native_mint(),
                &Address::native_mint(),
                TokenAmount(0),
                &wallet,
                SlippageBps(100),
                true,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SwapError::InvalidInput(_)));
        assert_eq!(primary.quote_calls() + secondary.quote_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_during_backoff() {
        let primary = Arc::new(MockSwapProvider::new(ProviderKind::Primary, "p"));
        let cancel = CancellationToken::new();
        let dispatcher = SwapDispatcher::new(
            vec![primary.clone()],
            DispatcherSettings {
                retry: RetryPolicy {
                    max_attempts: 3,
                    base_backoff: Duration::from_secs(3600),
                },
                min_interval: Duration::ZERO,
                ..DispatcherSettings::default()
            },
            Arc::new(ManualClock::new()),
            cancel.clone(),
        );
        primary.push_quote_error(ProviderError::network("reset"));

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = sell(&dispatcher).await.unwrap_err();
        assert!(matches!(err, SwapError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancelled_half_open_call_releases_breaker() {
        let primary = Arc::new(MockSwapProvider::new(ProviderKind::Primary, "p"));
        let clock = Arc::new(ManualClock::new());
        let cancel = CancellationToken::new();
        let dispatcher = SwapDispatcher::new(
            vec![primary.clone()],
            DispatcherSettings {
                retry: RetryPolicy {
                    max_attempts: 3,
                    base_backoff: Duration::from_secs(3600),
                },
                min_interval: Duration::ZERO,
                breaker_threshold: 1,
                breaker_timeout: Duration::from_secs(60),
            },
            clock.clone(),
            cancel.clone(),
        );

        primary.push_quote_error(ProviderError::new(ProviderErrorKind::NoRouteOrLiquidity, "none"));
        assert!(matches!(
            sell(&dispatcher).await.unwrap_err(),
            SwapError::AllProvidersFailed { .. }
        ));
        assert!(dispatcher.breaker(ProviderKind::Primary).unwrap().is_open);

        clock.advance(Duration::from_secs(60));
        primary.push_quote_error(ProviderError::network("reset"));
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        assert!(matches!(
            sell(&dispatcher).await.unwrap_err(),
            SwapError::Cancelled
        ));

        let snap = dispatcher.breaker(ProviderKind::Primary).unwrap();
        assert!(snap.is_open);
        assert_eq!(snap.failure_count, 1);
        assert!(dispatcher.slots[0].breaker.try_acquire());
    }
}
