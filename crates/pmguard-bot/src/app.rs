//! Main application orchestration.
//!
//! Builds the component graph from `AppConfig`, runs the monitoring worker
//! and the management endpoints, and tears everything down on shutdown.

use crate::config::AppConfig;
use crate::error::AppResult;
use pmguard_engine::{MonitoringWorker, RuleExecutor};
use pmguard_feed::{PriceCache, PriceFeed};
use pmguard_position::PositionTracker;
use pmguard_risk::CircuitBreaker;
use pmguard_store::{EventLog, RuleStore};
use pmguard_upstream::{with_timeout, DynTradingApi, HttpTradingApi};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Main application.
pub struct Application {
    config: AppConfig,
    api: DynTradingApi,
    events: Arc<EventLog>,
    store: Arc<RuleStore>,
    worker: Arc<MonitoringWorker>,
}

impl Application {
    /// Build the application against the HTTP upstream API.
    ///
    /// API keys are read from the environment variables named in `upstream`.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let http = config.upstream.http_config(|var| std::env::var(var).ok());
        let api: DynTradingApi = Arc::new(HttpTradingApi::new(http)?);
        Self::with_api(config, api)
    }

    /// Build the application against any `TradingApi`.
    pub fn with_api(config: AppConfig, api: DynTradingApi) -> AppResult<Self> {
        std::fs::create_dir_all(&config.persistence.data_dir)?;

        let events = Arc::new(EventLog::open(
            config.persistence.events_path(),
            config.persistence.event_buffer,
        )?);
        let store = Arc::new(RuleStore::open(
            config.persistence.rules_path(),
            events.clone(),
        )?);
        info!(
            data_dir = %config.persistence.data_dir,
            rules = store.list(None).len(),
            events = events.len(),
            "Journals loaded"
        );

        let request_timeout = config.upstream.request_timeout();
        let tracker = Arc::new(PositionTracker::new(
            api.clone(),
            request_timeout,
            config.worker.max_concurrent_refreshes,
        ));
        let cache = Arc::new(PriceCache::new(Duration::from_millis(
            config.price_cache.ttl_ms,
        )));
        let feed = Arc::new(PriceFeed::new(cache, api.clone(), request_timeout));
        let executor = RuleExecutor::new(
            store.clone(),
            tracker.clone(),
            api.clone(),
            request_timeout,
        );
        let breaker = CircuitBreaker::new(config.circuit_breaker.clone());
        let worker = Arc::new(MonitoringWorker::new(
            config.worker_config(),
            store.clone(),
            tracker,
            feed,
            executor,
            breaker,
        ));

        Ok(Self {
            config,
            api,
            events,
            store,
            worker,
        })
    }

    /// Rule CRUD surface.
    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    pub fn worker(&self) -> &Arc<MonitoringWorker> {
        &self.worker
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> AppResult<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            info!("Shutdown signal received");
        })
        .await
    }

    /// Run until `shutdown` completes, then stop the worker and flush the
    /// event journal.
    pub async fn run_until<F>(self, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        self.log_balances().await;

        self.worker.start();

        let server_token = CancellationToken::new();
        let server_handle = if self.config.dashboard.enabled {
            let worker = self.worker.clone();
            let dashboard = self.config.dashboard.clone();
            let token = server_token.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = pmguard_dashboard::run_server(worker, dashboard, token).await {
                    error!(error = %e, "Dashboard server failed");
                }
            }))
        } else {
            None
        };

        shutdown.await;

        info!("Shutting down");
        self.worker.stop().await;
        server_token.cancel();
        if let Some(handle) = server_handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Dashboard task ended abnormally");
            }
        }
        self.events.shutdown().await;

        let status = self.worker.status();
        info!(
            active_rules = status.active_rules_count,
            triggered_rules = status.triggered_rules_count,
            dropped_events = self.events.dropped_count(),
            "Shutdown complete"
        );
        Ok(())
    }

    /// Log each configured owner's balance. Failures are informational only.
    async fn log_balances(&self) {
        let timeout = self.config.upstream.request_timeout();
        for owner in self.config.upstream.owner_refs() {
            match with_timeout(timeout, self.api.get_balance(&owner)).await {
                Ok(balance) => info!(
                    owner = %owner,
                    available = %balance.available,
                    currency = balance.currency.as_deref().unwrap_or("-"),
                    "Owner balance"
                ),
                Err(e) => warn!(owner = %owner, error = %e, "Balance lookup failed"),
            }
        }
    }
}
