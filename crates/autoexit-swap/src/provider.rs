//! Swap provider trait.
//!
//! Each provider exposes the same three-step contract: quote, build and
//! submit, confirm. The dispatcher drives providers only through this
//! trait, so adding a provider is a list append.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use autoexit_core::TokenAmount;
use parking_lot::Mutex;

use crate::error::{ProviderError, ProviderResult};
use crate::types::{Confirmation, ProviderKind, Quote, SubmittedSwap, SwapRequest, TxFormat, WalletHandle};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// One execution provider.
pub trait SwapProvider: Send + Sync {
    /// Slot in the fallback order.
    fn kind(&self) -> ProviderKind;

    /// Human-readable provider name for logs and metrics.
    fn name(&self) -> &str;

    /// Price the swap. Must reject invalid input before any network call.
    fn quote<'a>(&'a self, request: &'a SwapRequest) -> BoxFuture<'a, ProviderResult<Quote>>;

    /// Build the transaction in `format`, sign it through the wallet and broadcast it.
    fn build_and_submit<'a>(
        &'a self,
        quote: &'a Quote,
        wallet: &'a WalletHandle,
        format: TxFormat,
    ) -> BoxFuture<'a, ProviderResult<SubmittedSwap>>;

    /// Wait for the transaction to land and verify its balance effect.
    fn confirm<'a>(&'a self, submitted: &'a SubmittedSwap) -> BoxFuture<'a, ProviderResult<Confirmation>>;
}

/// Arc wrapper for SwapProvider trait objects.
pub type DynSwapProvider = Arc<dyn SwapProvider>;

/// Scripted provider for tests.
///
/// Each stage pops the next scripted result; an empty script succeeds.
#[derive(Debug)]
pub struct MockSwapProvider {
    kind: ProviderKind,
    name: String,
    quoted_out: TokenAmount,
    delay: Mutex<Duration>,
    quote_results: Mutex<VecDeque<ProviderResult<()>>>,
    submit_results: Mutex<VecDeque<ProviderResult<()>>>,
    confirm_results: Mutex<VecDeque<ProviderResult<()>>>,
    quote_calls: AtomicU32,
    submit_formats: Mutex<Vec<TxFormat>>,
    confirm_calls: AtomicU32,
}

impl MockSwapProvider {
    pub fn new(kind: ProviderKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            quoted_out: TokenAmount(1_000_000),
            delay: Mutex::new(Duration::ZERO),
            quote_results: Mutex::new(VecDeque::new()),
            submit_results: Mutex::new(VecDeque::new()),
            confirm_results: Mutex::new(VecDeque::new()),
            quote_calls: AtomicU32::new(0),
            submit_formats: Mutex::new(Vec::new()),
            confirm_calls: AtomicU32::new(0),
        }
    }

    /// Script the next quote failure.
    pub fn push_quote_error(&self, err: ProviderError) {
        self.quote_results.lock().push_back(Err(err));
    }

    /// Script the next submit failure.
    pub fn push_submit_error(&self, err: ProviderError) {
        self.submit_results.lock().push_back(Err(err));
    }

    /// Script the next confirm failure.
    pub fn push_confirm_error(&self, err: ProviderError) {
        self.confirm_results.lock().push_back(Err(err));
    }

    /// Make every stage sleep before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn quote_calls(&self) -> u32 {
        self.quote_calls.load(Ordering::SeqCst)
    }

    pub fn submit_formats(&self) -> Vec<TxFormat> {
        self.submit_formats.lock().clone()
    }

    pub fn confirm_calls(&self) -> u32 {
        self.confirm_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn next(script: &Mutex<VecDeque<ProviderResult<()>>>) -> ProviderResult<()> {
        script.lock().pop_front().unwrap_or(Ok(()))
    }
}

impl SwapProvider for MockSwapProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn quote<'a>(&'a self, request: &'a SwapRequest) -> BoxFuture<'a, ProviderResult<Quote>> {
        Box::pin(async move {
            request.validate()?;
            self.quote_calls.fetch_add(1, Ordering::SeqCst);
            self.pause().await;
            Self::next(&self.quote_results)?;
            Ok(Quote {
                request: request.clone(),
                out_amount: self.quoted_out,
                min_out_amount: self.quoted_out,
                route: serde_json::Value::Null,
            })
        })
    }

    fn build_and_submit<'a>(
        &'a self,
        quote: &'a Quote,
        wallet: &'a WalletHandle,
        format: TxFormat,
    ) -> BoxFuture<'a, ProviderResult<SubmittedSwap>> {
        Box::pin(async move {
            let n = {
                let mut formats = self.submit_formats.lock();
                formats.push(format);
                formats.len()
            };
            self.pause().await;
            Self::next(&self.submit_results)?;
            Ok(SubmittedSwap {
                signatures: vec![format!("{}-sig-{n}", self.name)],
                wallet: wallet.address.clone(),
                input: quote.request.input.clone(),
                output: quote.request.output.clone(),
                pre_input_balance: quote.request.amount,
                pre_output_balance: TokenAmount::ZERO,
                quoted_out: quote.out_amount,
                last_valid_block_height: None,
                format,
            })
        })
    }

    fn confirm<'a>(&'a self, submitted: &'a SubmittedSwap) -> BoxFuture<'a, ProviderResult<Confirmation>> {
        Box::pin(async move {
            self.confirm_calls.fetch_add(1, Ordering::SeqCst);
            self.pause().await;
            Self::next(&self.confirm_results)?;
            Ok(Confirmation {
                signature: submitted.signature().to_string(),
                input_spent: submitted.pre_input_balance,
                received_amount: submitted.quoted_out,
            })
        })
    }
}
