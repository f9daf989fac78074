// =============================================================================
// MACD — Moving Average Convergence Divergence
// =============================================================================
//
// MACD line = EMA(fast) - EMA(slow); signal line = EMA(signal) of the MACD
// line. Fixed at the conventional 12/26/9 periods, matching the original
// system's indicator service.
//
// Only the MACD line (not the signal/histogram) is part of the public
// contract consumed by FeatureEngine and SymbolFilter scoring.
// =============================================================================

use super::ema::calculate_ema;

pub const MACD_FAST_PERIOD: usize = 12;
pub const MACD_SLOW_PERIOD: usize = 26;
pub const MACD_SIGNAL_PERIOD: usize = 9;

/// Compute the MACD line series (fast EMA minus slow EMA), aligned to the
/// slow EMA's start index.
///
/// # Edge cases
/// - `closes.len() < MACD_SLOW_PERIOD` => empty vec (not enough data for the
///   slow EMA).
pub fn calculate_macd_line(closes: &[f64]) -> Vec<f64> {
    if closes.len() < MACD_SLOW_PERIOD {
        return Vec::new();
    }

    let fast = calculate_ema(closes, MACD_FAST_PERIOD);
    let slow = calculate_ema(closes, MACD_SLOW_PERIOD);

    // `fast` starts MACD_SLOW_PERIOD - MACD_FAST_PERIOD entries earlier than
    // `slow`; align by skipping that prefix.
    let skip = MACD_SLOW_PERIOD - MACD_FAST_PERIOD;
    fast.iter()
        .skip(skip)
        .zip(slow.iter())
        .map(|(f, s)| f - s)
        .collect()
}

/// Compute the most recent MACD value, or `None` if there isn't enough data.
pub fn current_macd(closes: &[f64]) -> Option<f64> {
    calculate_macd_line(closes).last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_insufficient_data_is_empty() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        assert!(calculate_macd_line(&closes).is_empty());
    }

    #[test]
    fn macd_ascending_series_is_positive() {
        // Strongly rising prices => fast EMA pulls above slow EMA => MACD > 0.
        let closes: Vec<f64> = (1..=60).map(|x| x as f64).collect();
        let macd = current_macd(&closes).unwrap();
        assert!(macd > 0.0, "expected positive MACD for ascending series, got {macd}");
    }

    #[test]
    fn macd_descending_series_is_negative() {
        let closes: Vec<f64> = (1..=60).rev().map(|x| x as f64).collect();
        let macd = current_macd(&closes).unwrap();
        assert!(macd < 0.0, "expected negative MACD for descending series, got {macd}");
    }

    #[test]
    fn macd_flat_series_is_zero() {
        let closes = vec![100.0; 60];
        let macd = current_macd(&closes).unwrap();
        assert!(macd.abs() < 1e-9, "expected ~0 MACD for flat series, got {macd}");
    }

    #[test]
    fn current_macd_none_on_bad_input() {
        assert!(current_macd(&[]).is_none());
    }
}
