// =============================================================================
// MarketFeed — combined push (stream) + pull (REST) market data source
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::kline::{Kline, KlineKey, KlineRing};
use super::rest::fetch_klines;
use super::stream::{self, PriceMap, StreamCommand};

/// Default deadline for `add_symbol` when the caller does not specify one.
pub const DEFAULT_ADD_SYMBOL_DEADLINE: Duration = Duration::from_secs(5);

/// Bounded grace period for `stop()` to join the stream worker.
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// How many klines to seed a newly-monitored symbol's ring with.
const SEED_KLINE_LIMIT: u32 = 200;

pub struct MarketFeed {
    ws_url: String,
    http: reqwest::Client,
    ring: Arc<KlineRing>,
    prices: PriceMap,
    monitored: RwLock<HashSet<String>>,
    cmd_tx: RwLock<Option<mpsc::UnboundedSender<StreamCommand>>>,
    handle: RwLock<Option<JoinHandle<()>>>,
}

impl MarketFeed {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client for MarketFeed"),
            ring: Arc::new(KlineRing::new(super::kline::RING_CAPACITY)),
            prices: Arc::new(RwLock::new(std::collections::HashMap::new())),
            monitored: RwLock::new(HashSet::new()),
            cmd_tx: RwLock::new(None),
            handle: RwLock::new(None),
        }
    }

    /// Start the background stream worker. Idempotent.
    pub fn start(&self) {
        if self.cmd_tx.read().is_some() {
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let ring = self.ring.clone();
        let prices = self.prices.clone();
        let url = self.ws_url.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = stream::run(url, ring, prices, rx).await {
                warn!(error = %e, "market stream worker exited with error");
            }
        });
        *self.cmd_tx.write() = Some(tx);
        *self.handle.write() = Some(handle);
        info!("MarketFeed stream worker started");
    }

    /// Stop the background stream worker. Idempotent; joins within a bounded
    /// grace period and logs (without panicking) if that window is exceeded.
    pub async fn stop(&self) {
        let tx = self.cmd_tx.write().take();
        drop(tx); // closes the command channel, causing stream::run to return

        let handle = self.handle.write().take();
        if let Some(handle) = handle {
            match tokio::time::timeout(STOP_GRACE_PERIOD, handle).await {
                Ok(Ok(())) => info!("MarketFeed stream worker stopped"),
                Ok(Err(e)) => warn!(error = %e, "MarketFeed stream worker task panicked"),
                Err(_) => warn!("MarketFeed stream worker did not stop within grace period"),
            }
        }
    }

    /// Start monitoring `symbol` across `intervals`: REST-seed the ring, then
    /// subscribe the stream topics. Idempotent — a no-op if already
    /// monitored. Returns `true` if the symbol ends up monitored within
    /// `deadline`.
    pub async fn add_symbol(&self, symbol: &str, intervals: &[&str], deadline: Duration) -> bool {
        let symbol = symbol.to_uppercase();
        if self.is_monitoring(&symbol) {
            return true;
        }

        let fut = self.add_symbol_inner(&symbol, intervals);
        match tokio::time::timeout(deadline, fut).await {
            Ok(()) => {
                self.monitored.write().insert(symbol.clone());
                true
            }
            Err(_) => {
                warn!(symbol = %symbol, "add_symbol exceeded deadline, REST remains the only source");
                false
            }
        }
    }

    async fn add_symbol_inner(&self, symbol: &str, intervals: &[&str]) {
        for &interval in intervals {
            match fetch_klines(&self.http, symbol, interval, SEED_KLINE_LIMIT).await {
                Ok(klines) => {
                    for k in klines {
                        self.ring.update(
                            KlineKey {
                                symbol: symbol.to_string(),
                                interval: interval.to_string(),
                            },
                            k,
                        );
                    }
                }
                Err(e) => {
                    // REST failures during add_symbol are tolerated: the
                    // symbol can still end up monitored via the stream, and
                    // the pipeline falls back to REST on every read anyway.
                    warn!(symbol, interval, error = %e, "REST seed failed for add_symbol");
                }
            }
        }

        if let Some(tx) = self.cmd_tx.read().as_ref() {
            let mut topics: Vec<String> = intervals
                .iter()
                .map(|iv| stream::kline_topic(symbol, iv))
                .collect();
            topics.push(stream::ticker_topic(symbol));
            let _ = tx.send(StreamCommand::Subscribe(topics));
        }
    }

    /// Unsubscribe and drop all cached data for `symbol`.
    pub fn remove_symbol(&self, symbol: &str) {
        let symbol = symbol.to_uppercase();
        if !self.monitored.write().remove(&symbol) {
            return;
        }

        self.ring.remove_symbol(&symbol);
        self.prices.write().remove(&symbol);

        if let Some(tx) = self.cmd_tx.read().as_ref() {
            // We don't track exactly which intervals were subscribed per
            // symbol here; unsubscribe the common ones plus ticker.
            let topics = vec![
                stream::kline_topic(&symbol, "3m"),
                stream::kline_topic(&symbol, "4h"),
                stream::ticker_topic(&symbol),
            ];
            let _ = tx.send(StreamCommand::Unsubscribe(topics));
        }
    }

    /// Return up to `limit` most recent klines for `symbol`/`interval`,
    /// oldest-first, as an owned copy.
    pub fn get_klines(&self, symbol: &str, interval: &str, limit: usize) -> Vec<Kline> {
        let key = KlineKey {
            symbol: symbol.to_uppercase(),
            interval: interval.to_string(),
        };
        self.ring.get_closed(&key, limit)
    }

    /// Latest known price for `symbol`, preferring the ticker-pushed value
    /// and falling back to the most recent closed kline.
    pub fn get_latest_price(&self, symbol: &str) -> Option<f64> {
        let symbol = symbol.to_uppercase();
        if let Some(&p) = self.prices.read().get(&symbol) {
            return Some(p);
        }
        // Fall back to whichever interval has data.
        for interval in ["3m", "4h", "1m", "5m"] {
            let key = KlineKey {
                symbol: symbol.clone(),
                interval: interval.to_string(),
            };
            if let Some(c) = self.ring.last_close(&key) {
                return Some(c);
            }
        }
        None
    }

    pub fn is_monitoring(&self, symbol: &str) -> bool {
        self.monitored.read().contains(&symbol.to_uppercase())
    }

    /// Expose the raw ring for components (FeatureEngine, SymbolFilter) that
    /// need bulk read access without going through the async `get_klines`.
    pub fn ring(&self) -> &Arc<KlineRing> {
        &self.ring
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_feed_monitors_nothing() {
        let feed = MarketFeed::new("wss://example.invalid/ws");
        assert!(!feed.is_monitoring("BTCUSDT"));
        assert!(feed.get_latest_price("BTCUSDT").is_none());
        assert!(feed.get_klines("BTCUSDT", "3m", 10).is_empty());
    }

    #[test]
    fn remove_symbol_on_unmonitored_is_a_no_op() {
        let feed = MarketFeed::new("wss://example.invalid/ws");
        feed.remove_symbol("BTCUSDT"); // must not panic
        assert!(!feed.is_monitoring("BTCUSDT"));
    }

    #[test]
    fn latest_price_falls_back_to_ring_close() {
        let feed = MarketFeed::new("wss://example.invalid/ws");
        feed.ring.update(
            KlineKey { symbol: "BTCUSDT".into(), interval: "3m".into() },
            Kline {
                open_time: 0,
                close_time: 179_999,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.5,
                volume: 10.0,
                quote_volume: 1000.0,
                trades_count: 5,
                taker_buy_volume: 1.0,
                taker_buy_quote_volume: 100.0,
                is_closed: true,
            },
        );
        assert_eq!(feed.get_latest_price("BTCUSDT"), Some(100.5));
    }
}
