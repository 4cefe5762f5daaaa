//! Main application orchestration.
//!
//! Builds the swap stack (chain RPC, signer, providers, dispatcher), the
//! position store over the exited ledger, and the two loops, then runs
//! them as independent tasks until Ctrl-C.

use std::sync::Arc;

use autoexit_core::SystemClock;
use autoexit_monitor::{
    DiscoveryLoop, DynBuyEventSource, DynPriceSource, PositionMonitor, StaticBuyEvents,
    StaticPolicySource,
};
use autoexit_persistence::{ExitJournal, JsonlExitedLedger};
use autoexit_position::PositionStore;
use autoexit_swap::{
    AggregatorClient, DynChainRpc, DynSwapProvider, DynWalletSigner, RemoteSigner, RouterClient,
    RpcChainClient, SwapDispatcher,
};
use autoexit_telemetry::serve_metrics;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::adapters::{ChainBalanceSource, HttpPriceSource, JournalSink, JsonlBuyEventSource};
use crate::config::{AppConfig, SIGNER_TOKEN_ENV};
use crate::error::AppResult;

/// Journal file prefix: `{journal_dir}/exits_{date}.jsonl`.
const JOURNAL_PREFIX: &str = "exits";

/// Main application.
pub struct Application {
    config: AppConfig,
    ledger: Arc<JsonlExitedLedger>,
    store: Arc<PositionStore>,
    dispatcher: Arc<SwapDispatcher>,
    monitor: PositionMonitor,
    discovery: DiscoveryLoop,
    cancel: CancellationToken,
}

impl Application {
    /// Create a new application. Makes no network calls.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let cancel = CancellationToken::new();

        let ledger = Arc::new(JsonlExitedLedger::open(&config.persistence.ledger_path)?);
        let store = Arc::new(PositionStore::new(ledger.clone()));

        let chain: DynChainRpc = Arc::new(RpcChainClient::new(
            &config.rpc.url,
            &config.rpc.commitment,
        )?);
        let signer: DynWalletSigner = Arc::new(RemoteSigner::new(
            &config.signer.url,
            std::env::var(SIGNER_TOKEN_ENV).ok(),
        )?);

        let confirm = config.dispatcher.confirm();
        let providers: Vec<DynSwapProvider> = vec![
            Arc::new(AggregatorClient::new(
                &config.providers.aggregator_url,
                config.providers.priority_fee_lamports,
                chain.clone(),
                signer.clone(),
                confirm,
            )?),
            Arc::new(RouterClient::new(
                &config.providers.router_url,
                config.providers.compute_unit_price_micro_lamports,
                chain.clone(),
                signer,
                confirm,
            )?),
        ];
        let dispatcher = Arc::new(SwapDispatcher::new(
            providers,
            config.dispatcher.settings(),
            Arc::new(SystemClock),
            cancel.child_token(),
        ));

        let prices: DynPriceSource = Arc::new(HttpPriceSource::new(&config.price.url)?);
        let sink = Arc::new(JournalSink::new(ExitJournal::new(
            &config.persistence.journal_dir,
            JOURNAL_PREFIX,
        )?));

        let monitor = PositionMonitor::new(
            store.clone(),
            dispatcher.clone(),
            prices.clone(),
            sink,
            (&config.monitor).into(),
        );

        let buys: DynBuyEventSource = match &config.discovery.buy_events_path {
            Some(path) => Arc::new(JsonlBuyEventSource::new(path)),
            None => Arc::new(StaticBuyEvents::new()),
        };
        let discovery = DiscoveryLoop::new(
            store.clone(),
            Arc::new(StaticPolicySource::new(config.policies()?)),
            buys,
            Arc::new(ChainBalanceSource::new(chain)),
            prices,
            config.discovery.to_runtime()?,
        );

        Ok(Self {
            config,
            ledger,
            store,
            dispatcher,
            monitor,
            discovery,
            cancel,
        })
    }

    /// Shared position store.
    #[must_use]
    pub fn store(&self) -> &Arc<PositionStore> {
        &self.store
    }

    /// Token that stops both loops and pending rate-limit waits.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> AppResult<()> {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
            }
            cancel.cancel();
        });
        self.run_until_cancelled().await
    }

    /// Run until the cancel token fires.
    pub async fn run_until_cancelled(self) -> AppResult<()> {
        // One line per identity from here on; upserts since the last start
        // may have appended duplicates.
        self.ledger.compact()?;
        let exited = self.store.load_ledger()?;
        info!(
            exited,
            owners = self.config.owners.len(),
            providers = ?self.dispatcher.provider_names(),
            "Starting application"
        );

        if self.config.telemetry.enabled {
            let port = self.config.telemetry.metrics_port;
            tokio::spawn(async move {
                if let Err(e) = serve_metrics(port).await {
                    error!(error = %e, port, "Metrics server stopped");
                }
            });
        }

        let monitor = tokio::spawn(self.monitor.run(self.cancel.child_token()));
        let discovery = tokio::spawn(self.discovery.run(self.cancel.child_token()));

        self.cancel.cancelled().await;

        for (task, handle) in [("monitor", monitor), ("discovery", discovery)] {
            if let Err(e) = handle.await {
                error!(task, error = %e, "Task ended abnormally");
            }
        }

        info!(monitored = self.store.len(), "Shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoexit_core::{Address, OwnerId, PositionKey};
    use autoexit_persistence::{ExitedLedger, ExitedLedgerEntry};
    use chrono::Utc;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.persistence.ledger_path = dir.path().join("exited.jsonl").display().to_string();
        config.persistence.journal_dir = dir.path().join("journal").display().to_string();
        config.telemetry.enabled = false;
        config
    }

    #[test]
    fn test_new_wires_without_network() {
        let dir = TempDir::new().unwrap();
        let app = Application::new(config(&dir)).unwrap();
        assert!(app.store().is_empty());
        assert_eq!(app.dispatcher.provider_names(), vec!["aggregator", "router"]);
        assert!(dir.path().join("journal").is_dir());
    }

    #[tokio::test]
    async fn test_startup_compacts_and_loads_ledger() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let key = PositionKey::new(
            OwnerId::new("7"),
            Address::parse("DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263").unwrap(),
        );
        {
            let ledger = JsonlExitedLedger::open(&config.persistence.ledger_path).unwrap();
            for _ in 0..3 {
                ledger.upsert(&ExitedLedgerEntry::new(&key, Utc::now())).unwrap();
            }
        }

        let app = Application::new(config.clone()).unwrap();
        let store = app.store().clone();
        let cancel = app.cancel_token();
        cancel.cancel();
        app.run_until_cancelled().await.unwrap();

        assert!(store.is_exited(&key));
        let text = std::fs::read_to_string(&config.persistence.ledger_path).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_stops_when_cancelled() {
        let dir = TempDir::new().unwrap();
        let app = Application::new(config(&dir)).unwrap();
        let cancel = app.cancel_token();

        let handle = tokio::spawn(app.run_until_cancelled());
        cancel.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("application should stop")
            .unwrap()
            .unwrap();
    }
}
