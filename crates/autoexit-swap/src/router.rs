//! Secondary provider: AMM router trade API.
//!
//! `GET /compute/swap-base-in` prices the swap, `POST
//! /transaction/swap-base-in` builds one or more unsigned transactions.
//! Sells must name the token account the input is spent from.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::aggregator::parse_amount;
use crate::chain::DynChainRpc;
use crate::confirm::{await_confirmation, snapshot_balances, ConfirmSettings, BLOCKHASH_VALIDITY_BLOCKS};
use crate::error::{classify_message, ProviderError, ProviderErrorKind, ProviderResult};
use crate::http::read_json;
use crate::provider::{BoxFuture, SwapProvider};
use crate::signer::DynWalletSigner;
use crate::types::{Confirmation, ProviderKind, Quote, SubmittedSwap, SwapRequest, TxFormat, WalletHandle};

/// Default timeout for router requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Envelope shared by every router response.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComputeData {
    output_amount: String,
    other_amount_threshold: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    transaction: String,
}

fn tx_version(format: TxFormat) -> &'static str {
    match format {
        TxFormat::Versioned => "V0",
        TxFormat::Legacy => "LEGACY",
    }
}

/// AMM router client.
pub struct RouterClient {
    client: Client,
    base_url: String,
    compute_unit_price_micro_lamports: u64,
    chain: DynChainRpc,
    signer: DynWalletSigner,
    confirm: ConfirmSettings,
}

impl RouterClient {
    pub fn new(
        base_url: impl Into<String>,
        compute_unit_price_micro_lamports: u64,
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
            compute_unit_price_micro_lamports,
            chain,
            signer,
            confirm,
        })
    }

    fn envelope_error(msg: Option<String>) -> ProviderError {
        let message = msg.unwrap_or_else(|| "router returned success=false".to_string());
        ProviderError::new(classify_message(&message), message)
    }

    /// Locate the token account a sell spends from.
    async fn input_account(&self, quote: &Quote, wallet: &WalletHandle) -> ProviderResult<Option<String>> {
        let request = &quote.request;
        if !request.is_sell || request.input.is_native() {
            return Ok(None);
        }
        match self.chain.token_account(&wallet.address, &request.input).await? {
            Some(account) => Ok(Some(account.to_string())),
            None => Err(ProviderError::new(
                ProviderErrorKind::InsufficientFunds,
                format!("no token account for {} in wallet", request.input.short()),
            )),
        }
    }

    fn transaction_body(
        &self,
        quote: &Quote,
        wallet: &WalletHandle,
        format: TxFormat,
        input_account: Option<String>,
    ) -> Value {
        let mut body = json!({
            "computeUnitPriceMicroLamports": self.compute_unit_price_micro_lamports.to_string(),
            "swapResponse": quote.route,
            "txVersion": tx_version(format),
            "wallet": wallet.address.as_str(),
            "wrapSol": quote.request.input.is_native(),
            "unwrapSol": quote.request.output.is_native(),
        });
        if let Some(account) = input_account {
            body["inputAccount"] = json!(account);
        }
        body
    }
}

impl SwapProvider for RouterClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Secondary
    }

    fn name(&self) -> &str {
        "router"
    }

    fn quote<'a>(&'a self, request: &'a SwapRequest) -> BoxFuture<'a, ProviderResult<Quote>> {
        Box::pin(async move {
            request.validate()?;

            let url = format!("{}/compute/swap-base-in", self.base_url);
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
                    ("txVersion", tx_version(TxFormat::Versioned)),
                ])
                .send()
                .await?;

            let route: Value = read_json(response).await?;
            let envelope: Envelope<ComputeData> = serde_json::from_value(route.clone())
                .map_err(|e| ProviderError::unknown(format!("compute response: {e}")))?;
            if !envelope.success {
                return Err(Self::envelope_error(envelope.msg));
            }
            let data = envelope
                .data
                .ok_or_else(|| ProviderError::unknown("compute response missing data"))?;

            let out_amount = parse_amount(&data.output_amount)?;
            if out_amount.is_zero() {
                return Err(ProviderError::new(
                    ProviderErrorKind::NoRouteOrLiquidity,
                    "compute returned zero output",
                ));
            }
            let min_out_amount = match data.other_amount_threshold.as_deref() {
                Some(threshold) => parse_amount(threshold)?,
                None => out_amount,
            };

            debug!(
                input = %request.input.short(),
                output = %request.output.short(),
                amount = %request.amount,
                out_amount = %out_amount,
                "Router quote"
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
            let input_account = self.input_account(quote, wallet).await?;
            let (pre_input, pre_output) = snapshot_balances(
                self.chain.as_ref(),
                &wallet.address,
                &request.input,
                &request.output,
            )
            .await?;
            let last_valid = self
                .chain
                .block_height()
                .await
                .ok()
                .map(|h| h + BLOCKHASH_VALIDITY_BLOCKS);

            let url = format!("{}/transaction/swap-base-in", self.base_url);
            let response = self
                .client
                .post(&url)
                .json(&self.transaction_body(quote, wallet, format, input_account))
                .send()
                .await?;
            let envelope: Envelope<Vec<TransactionData>> = read_json(response).await?;
            if !envelope.success {
                return Err(Self::envelope_error(envelope.msg));
            }
            let transactions = envelope.data.unwrap_or_default();
            if transactions.is_empty() {
                return Err(ProviderError::unknown("router returned no transactions"));
            }

            // Setup transactions (e.g. account creation) precede the swap itself.
            let mut signatures = Vec::with_capacity(transactions.len());
            for tx in &transactions {
                signatures.push(self.signer.sign_and_submit(&tx.transaction, wallet).await?);
            }
            info!(
                provider = self.name(),
                signature = signatures.last().map(String::as_str).unwrap_or_default(),
                count = signatures.len(),
                %format,
                wallet = %wallet.address.short(),
                "Swap submitted"
            );

            Ok(SubmittedSwap {
                signatures,
                wallet: wallet.address.clone(),
                input: request.input.clone(),
                output: request.output.clone(),
                pre_input_balance: pre_input,
                pre_output_balance: pre_output,
                quoted_out: quote.out_amount,
                last_valid_block_height: last_valid,
                format,
            })
        })
    }

    fn confirm<'a>(&'a self, submitted: &'a SubmittedSwap) -> BoxFuture<'a, ProviderResult<Confirmation>> {
        Box::pin(async move { await_confirmation(self.chain.as_ref(), submitted, self.confirm).await })
    }
}
