// =============================================================================
// TraderSupervisor / TraderWorker — per-trader scan loops and lifecycle
// =============================================================================
//
// Grounded on `symbol_filter::SymbolFilter`'s start/stop idiom (a `watch`
// stop signal plus a stored `JoinHandle`, both behind `parking_lot::RwLock`
// so `start`/`stop`/`is_running` stay synchronous) and on
// `original_source/services/trader_manager.py::TraderManager`, which owns
// one running loop per enabled trader and persists `is_running` back to the
// `traders` table. Per spec §4.6, a scan that returns `Err` is logged and
// the worker waits 60 seconds before the next attempt rather than retrying
// immediately or killing the worker.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{self, TraderConfig};
use crate::exchange::rest_adapter::{ExchangeCredentials, RestExchangeAdapter};
use crate::exchange::ExchangeAdapter;
use crate::llm::{HttpLlmClient, LlmClient};
use crate::market_data::MarketFeed;
use crate::pipeline::DecisionPipeline;
use crate::store::StoreRepository;
use crate::symbol_filter::SymbolFilter;

/// One trader's whole lifetime: its own `MarketFeed`, optional `SymbolFilter`,
/// and a `DecisionPipeline` driving scans on a fixed cadence.
pub struct TraderWorker {
    trader_id: Uuid,
    config: RwLock<TraderConfig>,
    feed: Arc<MarketFeed>,
    symbol_filter: Option<Arc<SymbolFilter>>,
    pipeline: Arc<DecisionPipeline>,
    stop_tx: RwLock<Option<watch::Sender<bool>>>,
    handle: RwLock<Option<JoinHandle<()>>>,
}

impl TraderWorker {
    /// Idempotent: a second call while already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.handle.read().is_some() {
            warn!(trader_id = %self.trader_id, "trader worker already running");
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        *self.stop_tx.write() = Some(stop_tx);

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.feed.start();
            if let Some(sf) = &this.symbol_filter {
                sf.start();
            }

            let started_at = Instant::now();
            let mut call_count: u64 = 0;

            loop {
                if *stop_rx.borrow() {
                    break;
                }

                call_count += 1;
                let runtime_minutes = started_at.elapsed().as_secs_f64() / 60.0;
                let trader_config = this.config.read().clone();
                let scan_interval =
                    Duration::from_secs(trader_config.scan_interval_minutes.max(1) as u64 * 60);

                match this.pipeline.run_once(trader_config, runtime_minutes, call_count).await {
                    Ok(state) => {
                        info!(
                            trader_id = %this.trader_id,
                            call_count,
                            candidates = state.candidate_symbols.len(),
                            approved = state.approved.len(),
                            "scan complete"
                        );
                    }
                    Err(e) => {
                        error!(
                            trader_id = %this.trader_id,
                            call_count,
                            error = %e,
                            "scan failed, waiting 60s before retry"
                        );
                        if wait_or_stop(Duration::from_secs(60), &mut stop_rx).await {
                            break;
                        }
                        continue;
                    }
                }

                if wait_or_stop(scan_interval, &mut stop_rx).await {
                    break;
                }
            }

            this.feed.stop().await;
            if let Some(sf) = &this.symbol_filter {
                sf.stop().await;
            }
            info!(trader_id = %this.trader_id, "trader worker stopped");
        });

        *self.handle.write() = Some(handle);
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.stop_tx.write().take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.write().take() {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.read().is_some()
    }
}

/// Sleep for `duration` unless the stop signal fires first. Returns `true`
/// when the caller should stop the loop.
async fn wait_or_stop(duration: Duration, stop_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = stop_rx.changed() => *stop_rx.borrow(),
    }
}

/// Owns every registered `TraderWorker` and mirrors `is_running` back to the
/// `traders` table, matching `TraderManager`'s role in the original system.
pub struct TraderSupervisor {
    store: StoreRepository,
    http: reqwest::Client,
    workers: RwLock<HashMap<Uuid, Arc<TraderWorker>>>,
}

impl TraderSupervisor {
    pub fn new(store: StoreRepository) -> Self {
        Self { store, http: reqwest::Client::new(), workers: RwLock::new(HashMap::new()) }
    }

    /// Load every enabled trader row from the store and register a worker
    /// for each, without starting any of them.
    pub async fn load_all(&self) {
        let configs = config::load_trader_configs(&self.store).await;
        for trader_config in configs {
            self.register(trader_config);
        }
    }

    fn register(&self, trader_config: TraderConfig) {
        let trader_id = trader_config.id;

        let feed = Arc::new(MarketFeed::new(config::market_ws_url()));

        let symbol_filter = if trader_config.signal_source.use_inside_coins {
            Some(Arc::new(SymbolFilter::new(trader_config.trading_coins.clone(), feed.clone())))
        } else {
            None
        };

        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(RestExchangeAdapter::new(ExchangeCredentials {
            api_key: trader_config.exchange.api_key.clone(),
            secret_key: trader_config.exchange.secret_key.clone(),
            testnet: trader_config.exchange.testnet,
        }));

        let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(
            trader_config.ai_model.base_url.clone(),
            &trader_config.ai_model.api_key,
            trader_config.ai_model.model_name.clone(),
        ));

        let pipeline = Arc::new(DecisionPipeline {
            trader_id,
            feed: feed.clone(),
            symbol_filter: symbol_filter.clone(),
            adapter,
            llm,
            store: self.store.clone(),
            http: self.http.clone(),
        });

        let worker = Arc::new(TraderWorker {
            trader_id,
            config: RwLock::new(trader_config),
            feed,
            symbol_filter,
            pipeline,
            stop_tx: RwLock::new(None),
            handle: RwLock::new(None),
        });

        self.workers.write().insert(trader_id, worker);
    }

    fn worker(&self, trader_id: Uuid) -> Option<Arc<TraderWorker>> {
        self.workers.read().get(&trader_id).cloned()
    }

    pub async fn start(&self, trader_id: Uuid) -> bool {
        let Some(worker) = self.worker(trader_id) else { return false };
        worker.start();
        if let Err(e) = self.store.set_trader_running(trader_id, true).await {
            warn!(trader_id = %trader_id, error = %e, "failed to persist is_running=true");
        }
        true
    }

    pub async fn stop(&self, trader_id: Uuid) -> bool {
        let Some(worker) = self.worker(trader_id) else { return false };
        worker.stop().await;
        if let Err(e) = self.store.set_trader_running(trader_id, false).await {
            warn!(trader_id = %trader_id, error = %e, "failed to persist is_running=false");
        }
        true
    }

    pub async fn start_all(&self) {
        let ids: Vec<Uuid> = self.workers.read().keys().copied().collect();
        for id in ids {
            self.start(id).await;
        }
    }

    pub async fn stop_all(&self) {
        let ids: Vec<Uuid> = self.workers.read().keys().copied().collect();
        for id in ids {
            self.stop(id).await;
        }
    }

    pub fn status(&self, trader_id: Uuid) -> Option<bool> {
        self.worker(trader_id).map(|w| w.is_running())
    }

    /// Re-read this trader's row (and its joins) from the store and swap it
    /// into the running worker in place; restarts the worker only if it was
    /// already running. Returns `false` if the trader row no longer exists
    /// or is no longer enabled.
    pub async fn reload(&self, trader_id: Uuid) -> bool {
        let was_running = self.status(trader_id).unwrap_or(false);

        let configs = config::load_trader_configs(&self.store).await;
        let Some(trader_config) = configs.into_iter().find(|c| c.id == trader_id) else {
            if let Some(worker) = self.worker(trader_id) {
                worker.stop().await;
            }
            self.workers.write().remove(&trader_id);
            return false;
        };

        if let Some(worker) = self.worker(trader_id) {
            worker.stop().await;
        }
        self.register(trader_config);
        if was_running {
            self.start(trader_id).await;
        }

        true
    }
}
