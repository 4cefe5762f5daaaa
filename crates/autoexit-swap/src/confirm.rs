//! On-chain confirmation with balance verification.
//!
//! Broadcast acceptance is not success. A swap is confirmed only when the
//! signature has landed without error and the wallet's input balance has
//! actually dropped. A landed transaction with no input delta is an
//! `OnChainFailure`.

use std::time::Duration;

use autoexit_core::{Address, TokenAmount};
use tracing::{debug, warn};

use crate::chain::ChainRpc;
use crate::error::{ProviderError, ProviderResult};
use crate::types::{Confirmation, SubmittedSwap};

/// Polling parameters for confirmation.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmSettings {
    /// Hard upper bound on waiting, even if the blockhash is still valid.
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ConfirmSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Blocks a blockhash stays valid for after it is fetched.
pub const BLOCKHASH_VALIDITY_BLOCKS: u64 = 150;

/// Balances of the input and output asset before a swap.
pub async fn snapshot_balances(
    chain: &dyn ChainRpc,
    wallet: &Address,
    input: &Address,
    output: &Address,
) -> ProviderResult<(TokenAmount, TokenAmount)> {
    let pre_input = chain.balance(wallet, input).await?;
    let pre_output = chain.balance(wallet, output).await?;
    Ok((pre_input, pre_output))
}

/// Poll until the swap lands, the blockhash expires, or `settings.timeout` passes.
pub async fn await_confirmation(
    chain: &dyn ChainRpc,
    submitted: &SubmittedSwap,
    settings: ConfirmSettings,
) -> ProviderResult<Confirmation> {
    let signature = submitted.signature();
    if signature.is_empty() {
        return Err(ProviderError::unknown("no signature to confirm"));
    }

    let deadline = tokio::time::Instant::now() + settings.timeout;

    loop {
        match chain.signature_status(signature).await {
            Ok(Some(status)) => {
                if let Some(err) = status.err {
                    return Err(ProviderError::on_chain(format!(
                        "transaction {signature} failed: {err}"
                    )));
                }
                if status.confirmed {
                    return verify_effect(chain, submitted).await;
                }
            }
            Ok(None) => {}
            Err(e) => {
                // Status polling is best effort until the deadline.
                debug!(%signature, error = %e, "Signature status poll failed");
            }
        }

        if let Some(last_valid) = submitted.last_valid_block_height {
            if let Ok(height) = chain.block_height().await {
                if height > last_valid {
                    return Err(ProviderError::timeout(format!(
                        "blockhash expired for {signature} (height {height} > {last_valid})"
                    )));
                }
            }
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(ProviderError::timeout(format!(
                "{signature} not confirmed within {}ms",
                settings.timeout.as_millis()
            )));
        }

        tokio::time::sleep(settings.poll_interval).await;
    }
}

async fn verify_effect(chain: &dyn ChainRpc, submitted: &SubmittedSwap) -> ProviderResult<Confirmation> {
    let signature = submitted.signature().to_string();

    let post_input = chain.balance(&submitted.wallet, &submitted.input).await?;
    if post_input >= submitted.pre_input_balance {
        warn!(
            %signature,
            input = %submitted.input.short(),
            pre = %submitted.pre_input_balance,
            post = %post_input,
            "Transaction landed without spending input"
        );
        return Err(ProviderError::on_chain(format!(
            "{signature} landed but input balance did not decrease ({} -> {post_input})",
            submitted.pre_input_balance
        )));
    }
    let input_spent = submitted.pre_input_balance.saturating_sub(post_input);

    // Native output is muddied by fees; fall back to the quote when no delta shows.
    let received = match chain.balance(&submitted.wallet, &submitted.output).await {
        Ok(post_output) => post_output.saturating_sub(submitted.pre_output_balance),
        Err(e) => {
            debug!(%signature, error = %e, "Output balance unavailable, using quote");
            TokenAmount::ZERO
        }
    };
    let received_amount = if received.is_zero() {
        submitted.quoted_out
    } else {
        received
    };

    Ok(Confirmation {
        signature,
        input_spent,
        received_amount,
    })
}
