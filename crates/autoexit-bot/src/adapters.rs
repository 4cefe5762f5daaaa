//! Collaborator adapters for the monitor loops.

use std::path::PathBuf;
use std::time::Duration;

use autoexit_core::{Address, OwnerId, Price};
use autoexit_monitor::{
    BalanceSource, BuyEvent, BuyEventSource, EventSink, Holding, MonitorError, MonitorEvent,
    MonitorResult, PriceSource,
};
use autoexit_persistence::ExitJournal;
use autoexit_swap::{BoxFuture, DynChainRpc};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};

/// Default timeout for price requests.
const PRICE_TIMEOUT: Duration = Duration::from_secs(5);

/// Price API client (`GET {url}?ids={mint}`).
///
/// Any failure reads as "no price", which the monitor skips.
pub struct HttpPriceSource {
    client: Client,
    url: String,
}

impl HttpPriceSource {
    pub fn new(url: impl Into<String>) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(PRICE_TIMEOUT)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl PriceSource for HttpPriceSource {
    fn current_price(&self, asset: &Address) -> BoxFuture<'static, Option<Price>> {
        let client = self.client.clone();
        let url = self.url.clone();
        let asset = asset.clone();
        Box::pin(async move {
            let response = client
                .get(&url)
                .query(&[("ids", asset.as_str())])
                .send()
                .await
                .and_then(|r| r.error_for_status());
            let body: Value = match response {
                Ok(r) => match r.json().await {
                    Ok(v) => v,
                    Err(e) => {
                        debug!(asset = %asset, error = %e, "Price response not JSON");
                        return None;
                    }
                },
                Err(e) => {
                    debug!(asset = %asset, error = %e, "Price request failed");
                    return None;
                }
            };
            parse_price(&body, asset.as_str())
        })
    }
}

/// Extract `data.{mint}.price` (string or number).
fn parse_price(body: &Value, mint: &str) -> Option<Price> {
    let raw = body.get("data")?.get(mint)?.get("price")?;
    let value = match raw {
        Value::String(s) => s.parse::<Decimal>().ok()?,
        Value::Number(n) => n.to_string().parse::<Decimal>().ok()?,
        _ => return None,
    };
    Some(Price::new(value)).filter(Price::is_positive)
}

/// Buy events from a JSON Lines file, one `BuyEvent` per line.
///
/// The file is written by the buy path; it is re-read on every query.
pub struct JsonlBuyEventSource {
    path: PathBuf,
}

impl JsonlBuyEventSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BuyEventSource for JsonlBuyEventSource {
    fn buys_since<'a>(
        &'a self,
        owner: &'a OwnerId,
        since: DateTime<Utc>,
    ) -> BoxFuture<'a, MonitorResult<Vec<BuyEvent>>> {
        Box::pin(async move {
            let content = match tokio::fs::read_to_string(&self.path).await {
                Ok(c) => c,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => {
                    return Err(MonitorError::Source(format!(
                        "{}: {e}",
                        self.path.display()
                    )))
                }
            };

            let mut events = Vec::new();
            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<BuyEvent>(line) {
                    Ok(event) if &event.owner == owner && event.bought_at >= since => {
                        events.push(event)
                    }
                    Ok(_) => {}
                    Err(e) => warn!(line = line_no + 1, error = %e, "Skipping malformed buy event"),
                }
            }
            Ok(events)
        })
    }
}

/// Wallet balances from chain RPC token accounts.
pub struct ChainBalanceSource {
    chain: DynChainRpc,
}

impl ChainBalanceSource {
    pub fn new(chain: DynChainRpc) -> Self {
        Self { chain }
    }
}

impl BalanceSource for ChainBalanceSource {
    fn holdings<'a>(&'a self, wallet: &'a Address) -> BoxFuture<'a, MonitorResult<Vec<Holding>>> {
        Box::pin(async move {
            let holdings = self
                .chain
                .token_holdings(wallet)
                .await
                .map_err(|e| MonitorError::Source(e.to_string()))?;
            Ok(holdings
                .into_iter()
                .filter(|h| !h.amount.is_zero())
                .map(|h| Holding {
                    asset: h.mint,
                    quantity: h.amount.to_quantity(h.decimals),
                    decimals: h.decimals,
                })
                .collect())
        })
    }
}

/// Logs every event and journals confirmed exits.
pub struct JournalSink {
    journal: Mutex<ExitJournal>,
}

impl JournalSink {
    pub fn new(journal: ExitJournal) -> Self {
        Self {
            journal: Mutex::new(journal),
        }
    }
}

impl EventSink for JournalSink {
    fn emit(&self, event: &MonitorEvent) {
        match event {
            MonitorEvent::Exited(exit) => {
                info!(
                    owner = %exit.owner,
                    asset = %exit.asset,
                    reason = %exit.exit_reason,
                    received = %exit.received_amount,
                    provider = %exit.provider_name,
                    signature = %exit.signature,
                    "EXIT"
                );
                if let Err(e) = self.journal.lock().append(exit) {
                    error!(error = %e, signature = %exit.signature, "Failed to journal exit");
                }
            }
            MonitorEvent::ExitFailed {
                owner,
                asset,
                exit_reason,
                message,
                ..
            } => {
                warn!(owner = %owner, asset = %asset, reason = %exit_reason, error = %message, "EXIT FAILED (will retry)");
            }
            MonitorEvent::NeedsAttention {
                owner,
                asset,
                consecutive_errors,
                message,
            } => {
                warn!(owner = %owner, asset = %asset, consecutive_errors, error = %message, "NEEDS ATTENTION");
            }
            MonitorEvent::Evicted {
                owner,
                asset,
                message,
            } => {
                error!(owner = %owner, asset = %asset, error = %message, "EVICTED from monitoring");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoexit_core::{ExitReason, Quantity, TokenAmount};
    use autoexit_monitor::ExitEvent;
    use autoexit_swap::{MockChain, ProviderKind, TokenHolding};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::TempDir;

    const BONK: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";
    const WALLET: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

    #[test]
    fn test_parse_price_string_and_number() {
        let body = json!({ "data": { BONK: { "id": BONK, "price": "0.0000234" } } });
        assert_eq!(parse_price(&body, BONK), Some(Price::new(dec!(0.0000234))));

        let body = json!({ "data": { BONK: { "price": 1.5 } } });
        assert_eq!(parse_price(&body, BONK), Some(Price::new(dec!(1.5))));
    }

    #[test]
    fn test_parse_price_missing_or_zero() {
        assert_eq!(parse_price(&json!({ "data": { BONK: null } }), BONK), None);
        assert_eq!(parse_price(&json!({ "data": {} }), BONK), None);
        assert_eq!(
            parse_price(&json!({ "data": { BONK: { "price": "0" } } }), BONK),
            None
        );
    }

    fn buy_line(owner: &str, at: &str) -> String {
        json!({
            "owner": owner,
            "asset": BONK,
            "entry_price": "0.00002",
            "quantity": "1000000",
            "decimals": 5,
            "bought_at": at,
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_jsonl_buy_events_filter_by_owner_and_time() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("buys.jsonl");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "{}", buy_line("7", "2026-01-01T00:00:00Z")).unwrap();
        writeln!(f, "{}", buy_line("7", "2026-03-01T00:00:00Z")).unwrap();
        writeln!(f, "{}", buy_line("8", "2026-03-01T00:00:00Z")).unwrap();
        writeln!(f, "{{not json").unwrap();

        let source = JsonlBuyEventSource::new(&path);
        let since = "2026-02-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let events = source.buys_since(&OwnerId::new("7"), since).await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].quantity, Quantity::new(dec!(1000000)));
    }

    #[tokio::test]
    async fn test_jsonl_buy_events_missing_file_is_empty() {
        let source = JsonlBuyEventSource::new("/nonexistent/buys.jsonl");
        let events = source
            .buys_since(&OwnerId::new("7"), Utc::now())
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_chain_balances_convert_to_quantity() {
        let chain = Arc::new(MockChain::new());
        let wallet = Address::parse(WALLET).unwrap();
        chain.set_holdings(
            &wallet,
            vec![
                TokenHolding {
                    mint: Address::parse(BONK).unwrap(),
                    account: Address::native_mint(),
                    amount: TokenAmount(1_234_500),
                    decimals: 5,
                },
                TokenHolding {
                    mint: Address::native_mint(),
                    account: Address::native_mint(),
                    amount: TokenAmount::ZERO,
                    decimals: 9,
                },
            ],
        );

        let source = ChainBalanceSource::new(chain);
        let holdings = source.holdings(&wallet).await.unwrap();
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].quantity, Quantity::new(dec!(12.345)));
    }

    #[test]
    fn test_journal_sink_writes_exits_only() {
        let dir = TempDir::new().unwrap();
        let sink = JournalSink::new(ExitJournal::new(dir.path(), "exits").unwrap());

        sink.emit(&MonitorEvent::ExitFailed {
            owner: OwnerId::new("7"),
            asset: Address::parse(BONK).unwrap(),
            exit_reason: ExitReason::StopLoss,
            will_retry: true,
            message: "All providers failed".to_string(),
        });
        sink.emit(&MonitorEvent::Exited(ExitEvent {
            owner: OwnerId::new("7"),
            asset: Address::parse(BONK).unwrap(),
            rule_id: "r-1".to_string(),
            quantity: Quantity::new(dec!(10)),
            exit_reason: ExitReason::StopLoss,
            entry_price: Price::new(dec!(1)),
            exit_price: Price::new(dec!(0.9)),
            received_amount: TokenAmount(900),
            provider: ProviderKind::Primary,
            provider_name: "aggregator".to_string(),
            signature: "sig-1".to_string(),
            exited_at: Utc::now(),
        }));
        drop(sink);

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let text = std::fs::read_to_string(dir.path().join(format!("exits_{today}.jsonl"))).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("sig-1"));
    }
}
