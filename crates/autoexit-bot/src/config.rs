//! Application configuration.

use std::collections::HashSet;
use std::time::Duration;

use autoexit_core::{Address, ExitConditions, OwnerId, SlippageBps};
use autoexit_monitor::{DiscoveryConfig, MonitorConfig};
use autoexit_position::ExitPolicy;
use autoexit_swap::{ConfirmSettings, DispatcherSettings, RetryPolicy};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Environment variable holding the signer's bearer token.
pub const SIGNER_TOKEN_ENV: &str = "AUTOEXIT_SIGNER_TOKEN";

/// Position monitor loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorLoopConfig {
    /// Evaluation cadence (ms). Default: 1,000.
    #[serde(default = "default_monitor_tick_ms")]
    pub tick_ms: u64,
    /// Positions evaluated concurrently per tick. Default: 4.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Slippage for exits whose policy sets none (bps). Default: 100.
    #[serde(default = "default_slippage_bps")]
    pub default_slippage_bps: u16,
    /// Consecutive unexpected errors before eviction. Default: 3.
    /// Set to 1 to evict on the first unexpected error.
    #[serde(default = "default_max_unexpected_errors")]
    pub max_unexpected_errors: u32,
}

fn default_monitor_tick_ms() -> u64 {
    1000
}

fn default_max_concurrent() -> usize {
    4
}

fn default_slippage_bps() -> u16 {
    100
}

fn default_max_unexpected_errors() -> u32 {
    3
}

impl Default for MonitorLoopConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_monitor_tick_ms(),
            max_concurrent: default_max_concurrent(),
            default_slippage_bps: default_slippage_bps(),
            max_unexpected_errors: default_max_unexpected_errors(),
        }
    }
}

impl From<&MonitorLoopConfig> for MonitorConfig {
    fn from(cfg: &MonitorLoopConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(cfg.tick_ms),
            max_concurrent: cfg.max_concurrent,
            default_slippage: SlippageBps::new(cfg.default_slippage_bps),
            max_unexpected_errors: cfg.max_unexpected_errors,
            ..Default::default()
        }
    }
}

/// Discovery loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryLoopConfig {
    /// Discovery cadence (ms). Default: 10,000.
    #[serde(default = "default_discovery_tick_ms")]
    pub tick_ms: u64,
    /// Buy events read on the first pass (s). Default: 3,600.
    #[serde(default = "default_buy_lookback_secs")]
    pub buy_lookback_secs: u64,
    /// JSON Lines file of buy events. Buy-event discovery is off when unset.
    #[serde(default)]
    pub buy_events_path: Option<String>,
    /// Mints never admitted, e.g. stablecoins held as cash.
    #[serde(default)]
    pub ignored_assets: Vec<String>,
}

fn default_discovery_tick_ms() -> u64 {
    10_000
}

fn default_buy_lookback_secs() -> u64 {
    3600
}

impl Default for DiscoveryLoopConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_discovery_tick_ms(),
            buy_lookback_secs: default_buy_lookback_secs(),
            buy_events_path: None,
            ignored_assets: Vec::new(),
        }
    }
}

impl DiscoveryLoopConfig {
    pub fn to_runtime(&self) -> AppResult<DiscoveryConfig> {
        let ignored_assets = self
            .ignored_assets
            .iter()
            .map(|a| Address::parse(a))
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(DiscoveryConfig {
            tick_interval: Duration::from_millis(self.tick_ms),
            buy_lookback: Duration::from_secs(self.buy_lookback_secs),
            ignored_assets,
        })
    }
}

/// Fallback dispatcher: rate limit, retry, circuit breaker, confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Minimum spacing between calls to one provider (ms). Default: 500.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Tries per provider. Default: 3.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff; doubles per try (ms). Default: 1,000.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Consecutive failures that open a breaker. Default: 5.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    /// Time an open breaker stays open (ms). Default: 60,000.
    #[serde(default = "default_breaker_timeout_ms")]
    pub breaker_timeout_ms: u64,
    /// Longest wait for confirmation (ms). Default: 60,000.
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
    /// Signature status poll interval (ms). Default: 500.
    #[serde(default = "default_confirm_poll_ms")]
    pub confirm_poll_ms: u64,
}

fn default_min_interval_ms() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_timeout_ms() -> u64 {
    60_000
}

fn default_confirm_timeout_ms() -> u64 {
    60_000
}

fn default_confirm_poll_ms() -> u64 {
    500
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            breaker_threshold: default_breaker_threshold(),
            breaker_timeout_ms: default_breaker_timeout_ms(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
            confirm_poll_ms: default_confirm_poll_ms(),
        }
    }
}

impl DispatcherConfig {
    #[must_use]
    pub fn settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_backoff: Duration::from_millis(self.backoff_base_ms),
            },
            min_interval: Duration::from_millis(self.min_interval_ms),
            breaker_threshold: self.breaker_threshold,
            breaker_timeout: Duration::from_millis(self.breaker_timeout_ms),
        }
    }

    #[must_use]
    pub fn confirm(&self) -> ConfirmSettings {
        ConfirmSettings {
            timeout: Duration::from_millis(self.confirm_timeout_ms),
            poll_interval: Duration::from_millis(self.confirm_poll_ms),
        }
    }
}

/// Swap provider endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Primary: quote aggregator.
    #[serde(default = "default_aggregator_url")]
    pub aggregator_url: String,
    /// Priority fee for aggregator transactions (lamports). Auto when unset.
    #[serde(default)]
    pub priority_fee_lamports: Option<u64>,
    /// Secondary: AMM router.
    #[serde(default = "default_router_url")]
    pub router_url: String,
    /// Compute unit price for router transactions (micro-lamports).
    #[serde(default = "default_compute_unit_price")]
    pub compute_unit_price_micro_lamports: u64,
}

fn default_aggregator_url() -> String {
    "https://quote-api.jup.ag/v6".to_string()
}

fn default_router_url() -> String {
    "https://transaction-v1.raydium.io".to_string()
}

fn default_compute_unit_price() -> u64 {
    100_000
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            aggregator_url: default_aggregator_url(),
            priority_fee_lamports: None,
            router_url: default_router_url(),
            compute_unit_price_micro_lamports: default_compute_unit_price(),
        }
    }
}

/// Chain JSON-RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_url")]
    pub url: String,
    #[serde(default = "default_commitment")]
    pub commitment: String,
}

fn default_rpc_url() -> String {
    "https://api.mainnet-beta.solana.com".to_string()
}

fn default_commitment() -> String {
    "confirmed".to_string()
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            commitment: default_commitment(),
        }
    }
}

/// Remote signing service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    #[serde(default = "default_signer_url")]
    pub url: String,
}

fn default_signer_url() -> String {
    "http://127.0.0.1:8900/sign".to_string()
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            url: default_signer_url(),
        }
    }
}

/// Price API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceConfig {
    #[serde(default = "default_price_url")]
    pub url: String,
}

fn default_price_url() -> String {
    "https://api.jup.ag/price/v2".to_string()
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            url: default_price_url(),
        }
    }
}

/// Durable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Exited ledger file.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,
    /// Directory for daily exit journals.
    #[serde(default = "default_journal_dir")]
    pub journal_dir: String,
}

fn default_ledger_path() -> String {
    "data/exited.jsonl".to_string()
}

fn default_journal_dir() -> String {
    "data/journal".to_string()
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            ledger_path: default_ledger_path(),
            journal_dir: default_journal_dir(),
        }
    }
}

/// Metrics endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            metrics_port: default_metrics_port(),
        }
    }
}

/// One owner's exit rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerPolicyConfig {
    pub owner: String,
    pub rule_id: String,
    /// Wallet address (base58).
    pub wallet: String,
    /// Reference the signer resolves to this wallet's key.
    pub key_ref: String,
    #[serde(default)]
    pub take_profit_pct: Option<Decimal>,
    #[serde(default)]
    pub stop_loss_pct: Option<Decimal>,
    #[serde(default)]
    pub trailing_stop_pct: Option<Decimal>,
    #[serde(default)]
    pub slippage_bps: Option<u16>,
}

impl OwnerPolicyConfig {
    pub fn to_policy(&self) -> AppResult<ExitPolicy> {
        let conditions = ExitConditions::new(
            self.take_profit_pct,
            self.stop_loss_pct,
            self.trailing_stop_pct,
        )
        .map_err(|e| AppError::Config(format!("owner {}: {e}", self.owner)))?;

        let slippage = self.slippage_bps.map(SlippageBps::new);
        if let Some(s) = slippage.filter(|s| !s.is_valid()) {
            return Err(AppError::Config(format!(
                "owner {}: slippage {s} exceeds {}",
                self.owner,
                SlippageBps::MAX
            )));
        }

        Ok(ExitPolicy {
            owner: OwnerId::new(self.owner.clone()),
            rule_id: self.rule_id.clone(),
            wallet: Address::parse(&self.wallet)
                .map_err(|e| AppError::Config(format!("owner {}: {e}", self.owner)))?,
            key_ref: self.key_ref.clone(),
            conditions,
            slippage,
        })
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: MonitorLoopConfig,
    #[serde(default)]
    pub discovery: DiscoveryLoopConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub signer: SignerConfig,
    #[serde(default)]
    pub price: PriceConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub owners: Vec<OwnerPolicyConfig>,
}

impl AppConfig {
    /// Load and validate a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the loops cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        if self.monitor.tick_ms == 0 || self.discovery.tick_ms == 0 {
            return Err(AppError::Config("tick_ms must be positive".to_string()));
        }
        if self.monitor.max_concurrent == 0 {
            return Err(AppError::Config(
                "monitor.max_concurrent must be positive".to_string(),
            ));
        }
        if self.monitor.max_unexpected_errors == 0 {
            return Err(AppError::Config(
                "monitor.max_unexpected_errors must be at least 1".to_string(),
            ));
        }
        if !SlippageBps::new(self.monitor.default_slippage_bps).is_valid() {
            return Err(AppError::Config(format!(
                "monitor.default_slippage_bps exceeds {}",
                SlippageBps::MAX
            )));
        }
        if self.dispatcher.max_attempts == 0 || self.dispatcher.breaker_threshold == 0 {
            return Err(AppError::Config(
                "dispatcher.max_attempts and breaker_threshold must be positive".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for owner in &self.owners {
            owner.to_policy()?;
            if !seen.insert(owner.owner.as_str()) {
                return Err(AppError::Config(format!(
                    "owner {} has more than one policy",
                    owner.owner
                )));
            }
        }
        self.discovery.to_runtime()?;
        Ok(())
    }

    /// Exit policies from the `owners` table.
    pub fn policies(&self) -> AppResult<Vec<ExitPolicy>> {
        self.owners.iter().map(OwnerPolicyConfig::to_policy).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const WALLET: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.monitor.tick_ms, 1000);
        assert_eq!(config.monitor.max_concurrent, 4);
        assert_eq!(config.discovery.tick_ms, 10_000);
        assert_eq!(config.dispatcher.min_interval_ms, 500);
        assert_eq!(config.dispatcher.breaker_threshold, 5);
        assert_eq!(config.dispatcher.breaker_timeout_ms, 60_000);
        assert!(config.owners.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config = AppConfig::from_toml(&format!(
            r#"
            [monitor]
            tick_ms = 2000

            [[owners]]
            owner = "42"
            rule_id = "r-1"
            wallet = "{WALLET}"
            key_ref = "k-42"
            take_profit_pct = 50
            trailing_stop_pct = "12.5"
            "#
        ))
        .unwrap();

        assert_eq!(config.monitor.tick_ms, 2000);
        assert_eq!(config.monitor.max_unexpected_errors, 3);
        assert_eq!(config.dispatcher.max_attempts, 3);

        let policies = config.policies().unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].conditions.take_profit_pct, Some(dec!(50)));
        assert_eq!(policies[0].conditions.trailing_stop_pct, Some(dec!(12.5)));
        assert_eq!(policies[0].conditions.stop_loss_pct, None);
    }

    #[test]
    fn test_owner_without_conditions_rejected() {
        let err = AppConfig::from_toml(&format!(
            r#"
            [[owners]]
            owner = "42"
            rule_id = "r-1"
            wallet = "{WALLET}"
            key_ref = "k-42"
            "#
        ))
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_stop_loss_of_100_rejected() {
        let err = AppConfig::from_toml(&format!(
            r#"
            [[owners]]
            owner = "42"
            rule_id = "r-1"
            wallet = "{WALLET}"
            key_ref = "k-42"
            stop_loss_pct = 100
            "#
        ))
        .unwrap_err();
        assert!(err.to_string().contains("owner 42"));
    }

    #[test]
    fn test_bad_wallet_rejected() {
        assert!(AppConfig::from_toml(
            r#"
            [[owners]]
            owner = "42"
            rule_id = "r-1"
            wallet = "not-a-wallet"
            key_ref = "k-42"
            take_profit_pct = 10
            "#
        )
        .is_err());
    }

    #[test]
    fn test_duplicate_owner_rejected() {
        let owner = format!(
            r#"
            [[owners]]
            owner = "42"
            rule_id = "r-1"
            wallet = "{WALLET}"
            key_ref = "k-42"
            take_profit_pct = 10
            "#
        );
        assert!(AppConfig::from_toml(&format!("{owner}{owner}")).is_err());
    }

    #[test]
    fn test_runtime_conversions() {
        let config = AppConfig::default();
        let monitor: MonitorConfig = (&config.monitor).into();
        assert_eq!(monitor.tick_interval, Duration::from_secs(1));
        assert_eq!(monitor.default_slippage, SlippageBps(100));

        let settings = config.dispatcher.settings();
        assert_eq!(settings.retry.base_backoff, Duration::from_secs(1));
        assert_eq!(settings.min_interval, Duration::from_millis(500));
        assert_eq!(config.dispatcher.confirm().timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_shipped_default_file_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/default.toml");
        let config = AppConfig::from_file(path).unwrap();
        assert_eq!(config.discovery.to_runtime().unwrap().ignored_assets.len(), 1);
        assert!(config.owners.is_empty());
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[monitor]"));
        assert!(toml_str.contains("breaker_threshold"));
    }
}
