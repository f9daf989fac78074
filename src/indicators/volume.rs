// =============================================================================
// Volume statistics
// =============================================================================

use crate::market_data::Kline;

/// Current (most recent) and average volume over the supplied klines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeStats {
    pub current: f64,
    pub average: f64,
}

/// Compute volume stats over `klines`. Returns `None` on an empty slice.
pub fn calculate_volume_stats(klines: &[Kline]) -> Option<VolumeStats> {
    let current = klines.last()?.volume;
    let average = klines.iter().map(|k| k.volume).sum::<f64>() / klines.len() as f64;
    Some(VolumeStats { current, average })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kline(volume: f64) -> Kline {
        Kline {
            open_time: 0,
            close_time: 0,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.0,
            volume,
            quote_volume: volume * 100.0,
            trades_count: 10,
            taker_buy_volume: volume / 2.0,
            taker_buy_quote_volume: volume * 50.0,
            is_closed: true,
        }
    }

    #[test]
    fn empty_input_returns_none() {
        assert!(calculate_volume_stats(&[]).is_none());
    }

    #[test]
    fn average_and_current_match_expectations() {
        let klines = vec![kline(10.0), kline(20.0), kline(30.0)];
        let stats = calculate_volume_stats(&klines).unwrap();
        assert_eq!(stats.current, 30.0);
        assert!((stats.average - 20.0).abs() < 1e-9);
    }
}
