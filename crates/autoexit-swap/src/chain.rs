//! Chain JSON-RPC client.
//!
//! Read-only queries used to snapshot balances before a swap, verify the
//! balance effect after it, poll signature status, and list wallet
//! holdings for discovery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use autoexit_core::{Address, TokenAmount};
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{classify_message, ProviderError, ProviderResult};
use crate::http::read_json;
use crate::provider::BoxFuture;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// SPL token program.
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
/// Token-2022 program.
pub const TOKEN_2022_PROGRAM_ID: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

/// One token account held by a wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHolding {
    pub mint: Address,
    pub account: Address,
    pub amount: TokenAmount,
    pub decimals: u8,
}

/// Landing status of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStatus {
    /// Reached `confirmed` or `finalized`.
    pub confirmed: bool,
    /// Execution error reported by the chain, if any.
    pub err: Option<String>,
}

/// Read-only chain queries.
pub trait ChainRpc: Send + Sync {
    /// Balance of `mint` held by `owner`; native mint returns lamports.
    fn balance<'a>(&'a self, owner: &'a Address, mint: &'a Address) -> BoxFuture<'a, ProviderResult<TokenAmount>>;

    /// All non-empty token accounts held by `owner`.
    fn token_holdings<'a>(&'a self, owner: &'a Address) -> BoxFuture<'a, ProviderResult<Vec<TokenHolding>>>;

    /// Token account of `owner` for `mint`, largest first.
    fn token_account<'a>(&'a self, owner: &'a Address, mint: &'a Address) -> BoxFuture<'a, ProviderResult<Option<Address>>>;

    /// Status of a signature; `None` if not yet seen.
    fn signature_status<'a>(&'a self, signature: &'a str) -> BoxFuture<'a, ProviderResult<Option<SignatureStatus>>>;

    /// Current block height.
    fn block_height(&self) -> BoxFuture<'_, ProviderResult<u64>>;
}

/// Arc wrapper for ChainRpc trait objects.
pub type DynChainRpc = Arc<dyn ChainRpc>;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct KeyedAccount {
    pubkey: String,
    account: ParsedAccount,
}

#[derive(Debug, Deserialize)]
struct ParsedAccount {
    data: ParsedData,
}

#[derive(Debug, Deserialize)]
struct ParsedData {
    parsed: ParsedInner,
}

#[derive(Debug, Deserialize)]
struct ParsedInner {
    info: TokenAccountInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenAccountInfo {
    mint: String,
    token_amount: UiTokenAmount,
}

#[derive(Debug, Deserialize)]
struct UiTokenAmount {
    amount: String,
    decimals: u8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSignatureStatus {
    confirmation_status: Option<String>,
    err: Option<Value>,
}

/// JSON-RPC client over HTTP.
pub struct RpcChainClient {
    client: Client,
    url: String,
    commitment: String,
    request_id: AtomicU64,
}

impl RpcChainClient {
    /// Create a new RPC client.
    pub fn new(url: impl Into<String>, commitment: impl Into<String>) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            commitment: commitment.into(),
            request_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> ProviderResult<Value> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self.client.post(&self.url).json(&body).send().await?;
        let parsed: RpcResponse = read_json(response).await?;
        if let Some(err) = parsed.error {
            debug!(method, code = err.code, message = %err.message, "RPC error");
            return Err(ProviderError::new(
                classify_message(&err.message),
                format!("{method}: {} ({})", err.message, err.code),
            ));
        }

        parsed
            .result
            .ok_or_else(|| ProviderError::unknown(format!("{method}: missing result")))
    }

    async fn accounts_by_owner(&self, owner: &Address, filter: Value) -> ProviderResult<Vec<TokenHolding>> {
        let result = self
            .call(
                "getTokenAccountsByOwner",
                json!([
                    owner.as_str(),
                    filter,
                    { "encoding": "jsonParsed", "commitment": self.commitment }
                ]),
            )
            .await?;

        let accounts: Vec<KeyedAccount> = serde_json::from_value(
            result.get("value").cloned().unwrap_or(Value::Array(Vec::new())),
        )
        .map_err(|e| ProviderError::unknown(format!("getTokenAccountsByOwner: {e}")))?;

        let mut holdings = Vec::with_capacity(accounts.len());
        for keyed in accounts {
            let info = keyed.account.data.parsed.info;
            let amount = info
                .token_amount
                .amount
                .parse::<u64>()
                .map_err(|e| ProviderError::unknown(format!("token amount: {e}")))?;
            let (Ok(mint), Ok(account)) = (Address::parse(&info.mint), Address::parse(&keyed.pubkey)) else {
                debug!(mint = %info.mint, "Skipping token account with malformed address");
                continue;
            };
            holdings.push(TokenHolding {
                mint,
                account,
                amount: TokenAmount(amount),
                decimals: info.token_amount.decimals,
            });
        }
        Ok(holdings)
    }
}

impl ChainRpc for RpcChainClient {
    fn balance<'a>(&'a self, owner: &'a Address, mint: &'a Address) -> BoxFuture<'a, ProviderResult<TokenAmount>> {
        Box::pin(async move {
            if mint.is_native() {
                let result = self
                    .call(
                        "getBalance",
                        json!([owner.as_str(), { "commitment": self.commitment }]),
                    )
                    .await?;
                let lamports = result
                    .get("value")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| ProviderError::unknown("getBalance: missing value"))?;
                return Ok(TokenAmount(lamports));
            }

            let holdings = self
                .accounts_by_owner(owner, json!({ "mint": mint.as_str() }))
                .await?;
            let total = holdings
                .iter()
                .fold(0u64, |acc, h| acc.saturating_add(h.amount.raw()));
            Ok(TokenAmount(total))
        })
    }

    fn token_holdings<'a>(&'a self, owner: &'a Address) -> BoxFuture<'a, ProviderResult<Vec<TokenHolding>>> {
        Box::pin(async move {
            let mut holdings = Vec::new();
            for program in [TOKEN_PROGRAM_ID, TOKEN_2022_PROGRAM_ID] {
                let accounts = self
                    .accounts_by_owner(owner, json!({ "programId": program }))
                    .await?;
                holdings.extend(accounts.into_iter().filter(|h| !h.amount.is_zero()));
            }
            Ok(holdings)
        })
    }

    fn token_account<'a>(&'a self, owner: &'a Address, mint: &'a Address) -> BoxFuture<'a, ProviderResult<Option<Address>>> {
        Box::pin(async move {
            let mut holdings = self
                .accounts_by_owner(owner, json!({ "mint": mint.as_str() }))
                .await?;
            holdings.sort_by(|a, b| b.amount.cmp(&a.amount));
            Ok(holdings.into_iter().next().map(|h| h.account))
        })
    }

    fn signature_status<'a>(&'a self, signature: &'a str) -> BoxFuture<'a, ProviderResult<Option<SignatureStatus>>> {
        Box::pin(async move {
            let result = self
                .call(
                    "getSignatureStatuses",
                    json!([[signature], { "searchTransactionHistory": true }]),
                )
                .await?;

            let first = result
                .get("value")
                .and_then(Value::as_array)
                .and_then(|values| values.first())
                .cloned()
                .unwrap_or(Value::Null);
            if first.is_null() {
                return Ok(None);
            }

            let raw: RawSignatureStatus = serde_json::from_value(first)
                .map_err(|e| ProviderError::unknown(format!("getSignatureStatuses: {e}")))?;
            let confirmed = matches!(
                raw.confirmation_status.as_deref(),
                Some("confirmed") | Some("finalized")
            );
            let err = raw.err.filter(|e| !e.is_null()).map(|e| e.to_string());
            Ok(Some(SignatureStatus { confirmed, err }))
        })
    }

    fn block_height(&self) -> BoxFuture<'_, ProviderResult<u64>> {
        Box::pin(async move {
            let result = self
                .call("getBlockHeight", json!([{ "commitment": self.commitment }]))
                .await?;
            result
                .as_u64()
                .ok_or_else(|| ProviderError::unknown("getBlockHeight: not a number"))
        })
    }
}

/// In-memory chain for tests.
#[derive(Debug, Default)]
pub struct MockChain {
    balances: Mutex<HashMap<(Address, Address), TokenAmount>>,
    holdings: Mutex<HashMap<Address, Vec<TokenHolding>>>,
    statuses: Mutex<HashMap<String, SignatureStatus>>,
    height: AtomicU64,
    /// Balance changes applied once a signature is marked landed.
    effects: Mutex<HashMap<String, Vec<(Address, Address, TokenAmount)>>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, owner: &Address, mint: &Address, amount: TokenAmount) {
        self.balances
            .lock()
            .insert((owner.clone(), mint.clone()), amount);
    }

    pub fn set_holdings(&self, owner: &Address, holdings: Vec<TokenHolding>) {
        self.holdings.lock().insert(owner.clone(), holdings);
    }

    pub fn set_block_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    /// Register balance changes to apply when `signature` lands.
    pub fn on_land(&self, signature: &str, changes: Vec<(Address, Address, TokenAmount)>) {
        self.effects.lock().insert(signature.to_string(), changes);
    }

    /// Mark a signature landed, applying its registered effects.
    pub fn land(&self, signature: &str, err: Option<String>) {
        if let Some(changes) = self.effects.lock().remove(signature) {
            for (owner, mint, amount) in changes {
                self.set_balance(&owner, &mint, amount);
            }
        }
        self.statuses.lock().insert(
            signature.to_string(),
            SignatureStatus {
                confirmed: true,
                err,
            },
        );
    }
}

impl ChainRpc for MockChain {
    fn balance<'a>(&'a self, owner: &'a Address, mint: &'a Address) -> BoxFuture<'a, ProviderResult<TokenAmount>> {
        Box::pin(async move {
            Ok(self
                .balances
                .lock()
                .get(&(owner.clone(), mint.clone()))
                .copied()
                .unwrap_or_default())
        })
    }

    fn token_holdings<'a>(&'a self, owner: &'a Address) -> BoxFuture<'a, ProviderResult<Vec<TokenHolding>>> {
        Box::pin(async move { Ok(self.holdings.lock().get(owner).cloned().unwrap_or_default()) })
    }

    fn token_account<'a>(&'a self, owner: &'a Address, mint: &'a Address) -> BoxFuture<'a, ProviderResult<Option<Address>>> {
        Box::pin(async move {
            Ok(self
                .holdings
                .lock()
                .get(owner)
                .and_then(|hs| hs.iter().find(|h| &h.mint == mint))
                .map(|h| h.account.clone()))
        })
    }

    fn signature_status<'a>(&'a self, signature: &'a str) -> BoxFuture<'a, ProviderResult<Option<SignatureStatus>>> {
        Box::pin(async move { Ok(self.statuses.lock().get(signature).cloned()) })
    }

    fn block_height(&self) -> BoxFuture<'_, ProviderResult<u64>> {
        Box::pin(async move { Ok(self.height.load(Ordering::SeqCst)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token_accounts_response() {
        let value = json!([{
            "pubkey": "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
            "account": { "data": { "parsed": { "info": {
                "mint": "So11111111111111111111111111111111111111112",
                "tokenAmount": { "amount": "1500000", "decimals": 6, "uiAmount": 1.5 }
            }}}}
        }]);
        let accounts: Vec<KeyedAccount> = serde_json::from_value(value).unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].account.data.parsed.info.token_amount.amount, "1500000");
        assert_eq!(accounts[0].account.data.parsed.info.token_amount.decimals, 6);
    }

    #[tokio::test]
    async fn test_mock_chain_land_applies_effects() {
        let chain = MockChain::new();
        let owner = Address::native_mint();
        let mint = Address::parse("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v").unwrap();
        chain.set_balance(&owner, &mint, TokenAmount(100));
        chain.on_land("sig", vec![(owner.clone(), mint.clone(), TokenAmount(0))]);

        assert!(chain.signature_status("sig").await.unwrap().is_none());
        chain.land("sig", None);

        let status = chain.signature_status("sig").await.unwrap().unwrap();
        assert!(status.confirmed);
        assert_eq!(chain.balance(&owner, &mint).await.unwrap(), TokenAmount(0));
    }
}
