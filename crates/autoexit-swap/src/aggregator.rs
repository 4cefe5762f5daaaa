//! Primary provider: route aggregator HTTP API.
//!
//! `GET /quote` prices a route, `POST /swap` returns an unsigned
//! transaction for that route. The transaction format is selected with
//! `asLegacyTransaction`.

use std::time::Duration;

use autoexit_core::TokenAmount;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::chain::DynChainRpc;
use crate::confirm::{await_confirmation, snapshot_balances, ConfirmSettings};
use crate::error::{classify_message, ProviderError, ProviderResult};
use crate::http::read_json;
use crate::provider::{BoxFuture, SwapProvider};
use crate::signer::DynWalletSigner;
use crate::types::{Confirmation, ProviderKind, Quote, SubmittedSwap, SwapRequest, TxFormat, WalletHandle};

/// Default timeout for aggregator requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    out_amount: String,
    other_amount_threshold: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    swap_transaction: Option<String>,
    last_valid_block_height: Option<u64>,
    simulation_error: Option<Value>,
    error: Option<String>,
}

/// Route aggregator client.
pub struct AggregatorClient {
    client: Client,
    base_url: String,
    priority_fee_lamports: Option<u64>,
    chain: DynChainRpc,
    signer: DynWalletSigner,
    confirm: ConfirmSettings,
}

impl AggregatorClient {
    pub fn new(
        base_url: impl Into<String>,
        priority_fee_lamports: Option<u64>,
        chain: DynChainRpc,
        signer: DynWalletSigner,
        confirm: ConfirmSettings,
    ) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            priority_fee_lamports,
            chain,
            signer,
            confirm,
        })
    }

    fn swap_body(&self, quote: &Quote, wallet: &WalletHandle, format: TxFormat) -> Value {
        let priority = match self.priority_fee_lamports {
            Some(lamports) => json!(lamports),
            None => json!("auto"),
        };
        json!({
            "quoteResponse": quote.route,
            "userPublicKey": wallet.address.as_str(),
            "wrapAndUnwrapSol": true,
            "dynamicComputeUnitLimit": true,
            "asLegacyTransaction": format == TxFormat::Legacy,
            "prioritizationFeeLamports": priority,
        })
    }
}

impl SwapProvider for AggregatorClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Primary
    }

    fn name(&self) -> &str {
        "aggregator"
    }

    fn quote<'a>(&'a self, request: &'a SwapRequest) -> BoxFuture<'a, ProviderResult<Quote>> {
        Box::pin(async move {
            request.validate()?;

            let url = format!("{}/quote", self.base_url);
            let amount = request.amount.to_string();
            let slippage = request.slippage.get().to_string();
            let response = self
                .client
                .get(&url)
                .query(&[
                    ("inputMint", request.input.as_str()),
                    ("outputMint", request.output.as_str()),
                    ("amount", amount.as_str()),
                    ("slippageBps", slippage.as_str()),
                ])
                .send()
                .await?;

            let route: Value = read_json(response).await?;
            if let Some(error) = route.get("error").and_then(Value::as_str) {
                return Err(ProviderError::new(classify_message(error), error.to_string()));
            }

            let parsed: QuoteResponse = serde_json::from_value(route.clone())
                .map_err(|e| ProviderError::unknown(format!("quote response: {e}")))?;
            let out_amount = parse_amount(&parsed.out_amount)?;
            let min_out_amount = match parsed.other_amount_threshold.as_deref() {
                Some(threshold) => parse_amount(threshold)?,
                None => out_amount,
            };
            if out_amount.is_zero() {
                return Err(ProviderError::new(
                    crate::ProviderErrorKind::NoRouteOrLiquidity,
                    "quote returned zero output",
                ));
            }

            debug!(
                input = %request.input.short(),
                output = %request.output.short(),
                amount = %request.amount,
                out_amount = %out_amount,
                "Aggregator quote"
            );

            Ok(Quote {
                request: request.clone(),
                out_amount,
                min_out_amount,
                route,
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
            let request = &quote.request;
            let (pre_input, pre_output) = snapshot_balances(
                self.chain.as_ref(),
                &wallet.address,
                &request.input,
                &request.output,
            )
            .await?;

            let url = format!("{}/swap", self.base_url);
            let response = self
                .client
                .post(&url)
                .json(&self.swap_body(quote, wallet, format))
                .send()
                .await?;
            let swap: SwapResponse = read_json(response).await?;

            if let Some(error) = swap.error {
                return Err(ProviderError::new(classify_message(&error), error));
            }
            if let Some(sim) = swap.simulation_error.filter(|v| !v.is_null()) {
                let message = sim.to_string();
                return Err(ProviderError::new(classify_message(&message), message));
            }
            let transaction = swap
                .swap_transaction
                .ok_or_else(|| ProviderError::unknown("swap response missing transaction"))?;

            let signature = self.signer.sign_and_submit(&transaction, wallet).await?;
            info!(
                provider = self.name(),
                %signature,
                %format,
                wallet = %wallet.address.short(),
                "Swap submitted"
            );

            Ok(SubmittedSwap {
                signatures: vec![signature],
                wallet: wallet.address.clone(),
                input: request.input.clone(),
                output: request.output.clone(),
                pre_input_balance: pre_input,
                pre_output_balance: pre_output,
                quoted_out: quote.out_amount,
                last_valid_block_height: swap.last_valid_block_height,
                format,
            })
        })
    }

    fn confirm<'a>(&'a self, submitted: &'a SubmittedSwap) -> BoxFuture<'a, ProviderResult<Confirmation>> {
        Box::pin(async move { await_confirmation(self.chain.as_ref(), submitted, self.confirm).await })
    }
}

pub(crate) fn parse_amount(raw: &str) -> ProviderResult<TokenAmount> {
    raw.parse::<u64>()
        .map(TokenAmount)
        .map_err(|e| ProviderError::unknown(format!("bad amount {raw:?}: {e}")))
}
