//! Swap execution for autoexit.
//!
//! - `SwapProvider`: quote, build-and-submit, confirm against one provider
//! - `AggregatorClient` (primary) and `RouterClient` (secondary)
//! - `ChainRpc`: balance and signature queries used for confirmation
//! - `WalletSigner`: opaque signing collaborator
//! - `SwapDispatcher`: ordered fallback with circuit breaker, rate limiter
//!   and bounded retry per provider

pub mod aggregator;
pub mod breaker;
pub mod chain;
pub mod confirm;
pub mod dispatcher;
pub mod error;
mod http;
pub mod limiter;
pub mod provider;
pub mod retry;
pub mod router;
pub mod signer;
pub mod types;

pub use aggregator::AggregatorClient;
pub use breaker::{BreakerSnapshot, CircuitBreaker};
pub use chain::{ChainRpc, DynChainRpc, MockChain, RpcChainClient, SignatureStatus, TokenHolding};
pub use confirm::ConfirmSettings;
pub use dispatcher::{DispatcherSettings, SwapDispatcher};
pub use error::{DispatchResult, ProviderError, ProviderErrorKind, ProviderResult, SwapError};
pub use limiter::MinIntervalLimiter;
pub use provider::{BoxFuture, DynSwapProvider, MockSwapProvider, SwapProvider};
pub use retry::{RetryDecision, RetryPolicy};
pub use router::RouterClient;
pub use signer::{DynWalletSigner, MockSigner, RemoteSigner, WalletSigner};
pub use types::{
    AttemptOutcome, Confirmation, ProviderAttempt, ProviderKind, Quote, SubmittedSwap, SwapRequest,
    SwapResult, TxFormat, WalletHandle,
};
