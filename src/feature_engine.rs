// =============================================================================
// FeatureEngine — per-symbol, per-scan market feature extraction
// =============================================================================
//
// Consumes two kline timeframes for one symbol and emits a single
// `MarketFeatures` record. Optionally augments it with open-interest and
// funding-rate data from an exchange adapter.
//
// Grounded on the original system's feature_engine.py: the constant names
// and the calculate_features() step order below mirror it directly.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::exchange::ExchangeAdapter;
use crate::indicators::atr::calculate_atr;
use crate::indicators::ema::calculate_ema;
use crate::indicators::macd::current_macd;
use crate::indicators::rsi::calculate_rsi;
use crate::indicators::series::{calculate_series, SeriesBlock};
use crate::indicators::volume::calculate_volume_stats;
use crate::market_data::Kline;

pub const EMA_SHORT_PERIOD: usize = 20;
pub const EMA_LONG_PERIOD: usize = 50;
pub const RSI_SHORT_PERIOD: usize = 7;
pub const RSI_LONG_PERIOD: usize = 14;
pub const ATR_PERIOD: usize = 14;
pub const ATR_SHORT_PERIOD: usize = 3;

/// Minimum klines required on *both* timeframes for a symbol to be scored
/// this scan (invariant I2).
pub const MIN_KLINES_REQUIRED: usize = 20;

/// How many short-timeframe bars back `price_change_1h` looks (3-minute bars
/// ⇒ 20 bars == 60 minutes).
const PRICE_CHANGE_1H_BARS: usize = 20;
/// How many long-timeframe bars back `price_change_4h` looks.
const PRICE_CHANGE_4H_BARS: usize = 1;

/// Per-timeframe indicator block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeframeFeatures {
    pub ema20: Option<f64>,
    pub ema50: Option<f64>,
    pub macd: Option<f64>,
    pub rsi7: Option<f64>,
    pub rsi14: Option<f64>,
    pub atr14: Option<f64>,
    pub atr3: Option<f64>,
}

/// Flattened market features for one symbol as of one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketFeatures {
    pub symbol: String,
    pub current_price: f64,
    pub price_change_1h: f64,
    pub price_change_4h: f64,

    pub short_tf: TimeframeFeatures,
    pub long_tf: TimeframeFeatures,

    pub current_volume_4h: f64,
    pub average_volume_4h: f64,

    pub open_interest: Option<f64>,
    /// Placeholder derived as `0.999 * open_interest`, not a genuine rolling
    /// average — carried forward from the source system unchanged (see
    /// DESIGN.md Open Question 3).
    pub oi_average: Option<f64>,
    pub funding_rate: Option<f64>,

    #[serde(skip)]
    pub intraday_series: Option<SeriesBlock>,
    #[serde(skip)]
    pub longer_term_series: Option<SeriesBlock>,
}

/// Compute `MarketFeatures` for `symbol` from its short/long timeframe
/// klines (oldest-first). Returns `None` if either timeframe has fewer than
/// [`MIN_KLINES_REQUIRED`] klines (invariant I2).
///
/// When `skip_adapter_calls` is `true`, `open_interest`/`oi_average`/
/// `funding_rate` are left `None` and no adapter call is made — used by
/// SymbolFilter, which scores hundreds of symbols per minute and cannot
/// afford a network round-trip per symbol.
pub async fn calculate_features(
    symbol: &str,
    klines_short: &[Kline],
    klines_long: &[Kline],
    adapter: Option<&dyn ExchangeAdapter>,
    skip_adapter_calls: bool,
) -> Option<MarketFeatures> {
    if klines_short.len() < MIN_KLINES_REQUIRED || klines_long.len() < MIN_KLINES_REQUIRED {
        debug!(
            symbol,
            short_len = klines_short.len(),
            long_len = klines_long.len(),
            "insufficient klines, dropping symbol from this scan"
        );
        return None;
    }

    let current_price = klines_short
        .last()
        .map(|k| k.close)
        .unwrap_or_else(|| klines_long.last().map(|k| k.close).unwrap_or(0.0));

    let price_change_1h = pct_change_back(klines_short, PRICE_CHANGE_1H_BARS);
    let price_change_4h = pct_change_back(klines_long, PRICE_CHANGE_4H_BARS);

    let short_tf = timeframe_features(klines_short, false);
    let long_tf = timeframe_features(klines_long, true);

    let volume_stats = calculate_volume_stats(klines_long);
    let (current_volume_4h, average_volume_4h) = volume_stats
        .map(|v| (v.current, v.average))
        .unwrap_or((0.0, 0.0));

    let (open_interest, oi_average, funding_rate) = if skip_adapter_calls {
        (None, None, None)
    } else if let Some(adapter) = adapter {
        let oi = adapter.get_open_interest(symbol).await;
        let funding = adapter.get_funding_rate(symbol).await;
        let oi_avg = oi.map(|v| v * 0.999);
        (oi, oi_avg, funding)
    } else {
        (None, None, None)
    };

    Some(MarketFeatures {
        symbol: symbol.to_string(),
        current_price,
        price_change_1h,
        price_change_4h,
        short_tf,
        long_tf,
        current_volume_4h,
        average_volume_4h,
        open_interest,
        oi_average,
        funding_rate,
        intraday_series: Some(calculate_series(klines_short)),
        longer_term_series: Some(calculate_series(klines_long)),
    })
}

fn timeframe_features(klines: &[Kline], long_timeframe: bool) -> TimeframeFeatures {
    let closes: Vec<f64> = klines.iter().map(|k| k.close).collect();

    TimeframeFeatures {
        ema20: calculate_ema(&closes, EMA_SHORT_PERIOD).last().copied(),
        ema50: if long_timeframe {
            calculate_ema(&closes, EMA_LONG_PERIOD).last().copied()
        } else {
            None
        },
        macd: current_macd(&closes),
        rsi7: calculate_rsi(&closes, RSI_SHORT_PERIOD).last().copied(),
        rsi14: calculate_rsi(&closes, RSI_LONG_PERIOD).last().copied(),
        atr14: if long_timeframe {
            calculate_atr(klines, ATR_PERIOD)
        } else {
            None
        },
        atr3: if long_timeframe {
            calculate_atr(klines, ATR_SHORT_PERIOD)
        } else {
            None
        },
    }
}

/// Percent change between the last close and the close `bars_back` bars
/// earlier. Returns 0.0 if there isn't enough history.
fn pct_change_back(klines: &[Kline], bars_back: usize) -> f64 {
    if klines.len() <= bars_back {
        return 0.0;
    }
    let last = klines[klines.len() - 1].close;
    let prior = klines[klines.len() - 1 - bars_back].close;
    if prior == 0.0 {
        return 0.0;
    }
    (last - prior) / prior * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ascending_klines(n: usize, start: f64) -> Vec<Kline> {
        (0..n)
            .map(|i| Kline {
                open_time: i as i64 * 60_000,
                close_time: i as i64 * 60_000 + 59_999,
                open: start + i as f64,
                high: start + i as f64 + 1.0,
                low: start + i as f64 - 1.0,
                close: start + i as f64,
                volume: 100.0 + i as f64,
                quote_volume: 1000.0,
                trades_count: 10,
                taker_buy_volume: 50.0,
                taker_buy_quote_volume: 500.0,
                is_closed: true,
            })
            .collect()
    }

    #[tokio::test]
    async fn insufficient_klines_returns_none() {
        let short = ascending_klines(10, 100.0);
        let long = ascending_klines(30, 100.0);
        let result = calculate_features("BTC/USDT", &short, &long, None, true).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn skip_adapter_calls_leaves_oi_fields_null() {
        let short = ascending_klines(30, 100.0);
        let long = ascending_klines(60, 100.0);
        let features = calculate_features("BTC/USDT", &short, &long, None, true)
            .await
            .unwrap();
        assert!(features.open_interest.is_none());
        assert!(features.oi_average.is_none());
        assert!(features.funding_rate.is_none());
    }

    #[tokio::test]
    async fn current_price_prefers_short_timeframe_close() {
        let short = ascending_klines(30, 200.0);
        let long = ascending_klines(60, 100.0);
        let features = calculate_features("BTC/USDT", &short, &long, None, true)
            .await
            .unwrap();
        assert_eq!(features.current_price, short.last().unwrap().close);
    }

    #[tokio::test]
    async fn long_timeframe_only_fields_are_populated() {
        let short = ascending_klines(30, 100.0);
        let long = ascending_klines(60, 100.0);
        let features = calculate_features("BTC/USDT", &short, &long, None, true)
            .await
            .unwrap();
        assert!(features.short_tf.ema50.is_none());
        assert!(features.short_tf.atr14.is_none());
        assert!(features.long_tf.ema50.is_some());
        assert!(features.long_tf.atr14.is_some());
    }

    #[test]
    fn pct_change_back_handles_short_history() {
        let klines = ascending_klines(5, 100.0);
        assert_eq!(pct_change_back(&klines, 20), 0.0);
    }
}
