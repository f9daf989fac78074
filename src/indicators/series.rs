// =============================================================================
// Aligned indicator series — for prompt rendering
// =============================================================================
//
// FeatureEngine renders a condensed view of each timeframe's indicator
// history into the AI prompt. These "series" variants return arrays aligned
// element-wise with the input klines: every warm-up position that an
// indicator cannot yet compute is padded with `f64::NAN` rather than
// shortening the array, so callers can zip them against kline timestamps
// without an off-by-`period` bug.
// =============================================================================

use crate::market_data::Kline;

use super::ema::calculate_ema;
use super::macd::calculate_macd_line;
use super::rsi::calculate_rsi;

#[derive(Debug, Clone)]
pub struct SeriesBlock {
    pub mid_prices: Vec<f64>,
    pub ema20: Vec<f64>,
    pub macd: Vec<f64>,
    pub rsi7: Vec<f64>,
    pub rsi14: Vec<f64>,
}

/// Compute the aligned series block for one timeframe's klines.
pub fn calculate_series(klines: &[Kline]) -> SeriesBlock {
    let closes: Vec<f64> = klines.iter().map(|k| k.close).collect();
    let len = closes.len();

    SeriesBlock {
        mid_prices: closes.clone(),
        ema20: left_pad_nan(calculate_ema(&closes, 20), len),
        macd: left_pad_nan(calculate_macd_line(&closes), len),
        rsi7: left_pad_nan(calculate_rsi(&closes, 7), len),
        rsi14: left_pad_nan(calculate_rsi(&closes, 14), len),
    }
}

/// Condense a series into `(first, last, min, max)` over its non-NaN
/// elements, for compact prompt rendering. Returns `None` if every element
/// is NaN or the series is empty.
pub fn summarize(series: &[f64]) -> Option<(f64, f64, f64, f64)> {
    let valid: Vec<f64> = series.iter().copied().filter(|v| v.is_finite()).collect();
    if valid.is_empty() {
        return None;
    }
    let first = valid[0];
    let last = *valid.last().unwrap();
    let min = valid.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = valid.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    Some((first, last, min, max))
}

fn left_pad_nan(series: Vec<f64>, target_len: usize) -> Vec<f64> {
    if series.len() >= target_len {
        return series;
    }
    let mut out = vec![f64::NAN; target_len - series.len()];
    out.extend(series);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kline(close: f64) -> Kline {
        Kline {
            open_time: 0,
            close_time: 0,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            quote_volume: 1.0,
            trades_count: 1,
            taker_buy_volume: 0.0,
            taker_buy_quote_volume: 0.0,
            is_closed: true,
        }
    }

    #[test]
    fn series_is_aligned_to_input_length() {
        let klines: Vec<Kline> = (1..=40).map(|i| kline(i as f64)).collect();
        let series = calculate_series(&klines);
        assert_eq!(series.mid_prices.len(), 40);
        assert_eq!(series.ema20.len(), 40);
        assert_eq!(series.macd.len(), 40);
        assert_eq!(series.rsi7.len(), 40);
        assert_eq!(series.rsi14.len(), 40);
    }

    #[test]
    fn warm_up_prefix_is_nan() {
        let klines: Vec<Kline> = (1..=40).map(|i| kline(i as f64)).collect();
        let series = calculate_series(&klines);
        assert!(series.ema20[0].is_nan());
        assert!(series.rsi14[0].is_nan());
        assert!(!series.ema20[39].is_nan());
    }

    #[test]
    fn summarize_empty_is_none() {
        assert!(summarize(&[]).is_none());
        assert!(summarize(&[f64::NAN, f64::NAN]).is_none());
    }

    #[test]
    fn summarize_picks_first_last_min_max() {
        let series = vec![f64::NAN, 3.0, 1.0, 5.0, 2.0];
        let (first, last, min, max) = summarize(&series).unwrap();
        assert_eq!(first, 3.0);
        assert_eq!(last, 2.0);
        assert_eq!(min, 1.0);
        assert_eq!(max, 5.0);
    }
}
