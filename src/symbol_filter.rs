// =============================================================================
// SymbolFilter — background Top-N symbol scoring loop
// =============================================================================
//
// Ranks a caller-provided universe once a minute using cached klines only
// (no REST calls — `FeatureEngine::calculate_features` is invoked with
// `skip_adapter_calls=true`), and publishes a copy-on-read Top-N list under
// a mutex. One background task per `SymbolFilter`, grounded on the
// `MarketFeed`/`stream::run` reconnect-loop idiom for its stop-signal
// handling, and on `original_source/services/market/symbol_filter.py` for
// the scoring algorithm and 60-second cadence.
// =============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::feature_engine::{calculate_features, MarketFeatures, TimeframeFeatures};
use crate::market_data::MarketFeed;

/// How many symbols survive each scoring pass.
pub const TOP_N: usize = 20;
const SCAN_INTERVAL_SECS: u64 = 60;
const SHORT_TF: &str = "3m";
const LONG_TF: &str = "4h";

pub struct SymbolFilter {
    universe: Vec<String>,
    feed: Arc<MarketFeed>,
    filtered: Arc<RwLock<Vec<String>>>,
    stop_tx: RwLock<Option<watch::Sender<bool>>>,
    handle: RwLock<Option<JoinHandle<()>>>,
}

impl SymbolFilter {
    pub fn new(universe: Vec<String>, feed: Arc<MarketFeed>) -> Self {
        Self {
            universe,
            feed,
            filtered: Arc::new(RwLock::new(Vec::new())),
            stop_tx: RwLock::new(None),
            handle: RwLock::new(None),
        }
    }

    /// Idempotent: a second call while already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.handle.read().is_some() {
            warn!("symbol filter already running");
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        *self.stop_tx.write() = Some(stop_tx);

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("symbol filter loop started");
            loop {
                match this.perform_filtering().await {
                    Ok(scored) => {
                        let count = scored.len();
                        *this.filtered.write() = scored;
                        info!(count, "symbol filter pass complete");
                    }
                    Err(e) => warn!(error = %e, "symbol filter pass failed"),
                }

                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(SCAN_INTERVAL_SECS)) => {}
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("symbol filter loop stopped");
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

    /// Copy-on-read Top-N list. Empty before the first pass completes.
    pub fn get_filtered_symbols(&self) -> Vec<String> {
        self.filtered.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.read().is_some()
    }

    async fn perform_filtering(&self) -> anyhow::Result<Vec<String>> {
        if self.universe.is_empty() {
            debug!("symbol filter universe is empty, waiting for data to load");
            return Ok(Vec::new());
        }

        let mut scored: Vec<(String, i32)> = Vec::with_capacity(self.universe.len());

        for symbol in &self.universe {
            let short = self.feed.get_klines(symbol, SHORT_TF, 200);
            let long = self.feed.get_klines(symbol, LONG_TF, 200);

            let Some(features) =
                calculate_features(symbol, &short, &long, None, true).await
            else {
                continue;
            };

            scored.push((symbol.clone(), score(&features)));
        }

        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored.truncate(TOP_N);

        Ok(scored.into_iter().map(|(symbol, _)| symbol).collect())
    }
}

/// Deterministic [0, 100] score for one symbol's features. Pure function —
/// identical inputs must always produce the identical integer score.
pub fn score(features: &MarketFeatures) -> i32 {
    let mut s: i32 = 50;

    s += tf_price_delta(&features.short_tf, features.current_price, 10);
    s += tf_price_delta(&features.long_tf, features.current_price, 15);
    s += tf_macd_delta(&features.short_tf, 10);
    s += tf_macd_delta(&features.long_tf, 15);
    s += tf_rsi_bonus(&features.short_tf);
    s += tf_rsi_bonus(&features.long_tf);

    s.clamp(0, 100)
}

fn tf_price_delta(tf: &TimeframeFeatures, current_price: f64, magnitude: i32) -> i32 {
    match tf.ema20 {
        Some(ema20) if current_price > ema20 => magnitude,
        Some(_) => -magnitude,
        None => 0,
    }
}

fn tf_macd_delta(tf: &TimeframeFeatures, magnitude: i32) -> i32 {
    match tf.macd {
        Some(macd) if macd > 0.0 => magnitude,
        Some(_) => -magnitude,
        None => 0,
    }
}

fn tf_rsi_bonus(tf: &TimeframeFeatures) -> i32 {
    match tf.rsi14 {
        Some(rsi) if rsi > 30.0 && rsi < 70.0 => 5,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tf(ema20: Option<f64>, macd: Option<f64>, rsi14: Option<f64>) -> TimeframeFeatures {
        TimeframeFeatures { ema20, ema50: None, macd, rsi7: None, rsi14, atr14: None, atr3: None }
    }

    fn features(short: TimeframeFeatures, long: TimeframeFeatures, price: f64) -> MarketFeatures {
        MarketFeatures {
            symbol: "BTC/USDT".into(),
            current_price: price,
            price_change_1h: 0.0,
            price_change_4h: 0.0,
            short_tf: short,
            long_tf: long,
            current_volume_4h: 0.0,
            average_volume_4h: 0.0,
            open_interest: None,
            oi_average: None,
            funding_rate: None,
            intraday_series: None,
            longer_term_series: None,
        }
    }

    #[test]
    fn all_bullish_signals_max_out_at_one_hundred() {
        let short = tf(Some(90.0), Some(1.0), Some(50.0));
        let long = tf(Some(90.0), Some(1.0), Some(50.0));
        let f = features(short, long, 100.0);
        assert_eq!(score(&f), 100);
    }

    #[test]
    fn all_bearish_signals_floor_at_zero() {
        let short = tf(Some(110.0), Some(-1.0), Some(20.0));
        let long = tf(Some(110.0), Some(-1.0), Some(80.0));
        let f = features(short, long, 100.0);
        assert_eq!(score(&f), 0);
    }

    #[test]
    fn missing_indicator_data_contributes_no_delta() {
        let short = tf(None, None, None);
        let long = tf(None, None, None);
        let f = features(short, long, 100.0);
        assert_eq!(score(&f), 50);
    }

    #[test]
    fn score_is_deterministic_for_identical_features() {
        let short = tf(Some(95.0), Some(0.5), Some(55.0));
        let long = tf(Some(105.0), Some(-0.2), Some(35.0));
        let f1 = features(short.clone(), long.clone(), 100.0);
        let f2 = features(short, long, 100.0);
        assert_eq!(score(&f1), score(&f2));
    }
}
