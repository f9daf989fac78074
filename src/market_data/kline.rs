// =============================================================================
// Kline (candle) ring buffer
// =============================================================================
//
// A `Kline` is an immutable OHLCV bar. `KlineRing` is the thread-safe,
// bounded, per-(symbol, interval) ring that `MarketFeed` owns: one write path
// (stream + REST backfill) feeds it, many read paths copy out of it under a
// single shared lock.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Maximum number of closed klines retained per (symbol, interval) key.
pub const RING_CAPACITY: usize = 1000;

/// A single OHLCV bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trades_count: u64,
    pub taker_buy_volume: f64,
    pub taker_buy_quote_volume: f64,
    pub is_closed: bool,
}

/// Composite key identifying a unique kline series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct KlineKey {
    pub symbol: String,
    pub interval: String,
}

impl std::fmt::Display for KlineKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

/// Thread-safe ring buffer keyed by `(symbol, interval)`.
///
/// The live (unclosed) bar is continuously replaced in place; once a bar
/// closes it becomes permanent and the ring is trimmed to `capacity`.
/// Implements invariant I1: open_times are strictly monotonic except the
/// last entry, which may be replaced in place when a new close arrives for
/// the same open_time.
pub struct KlineRing {
    series: RwLock<HashMap<KlineKey, VecDeque<Kline>>>,
    capacity: usize,
}

impl KlineRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Insert or replace the latest kline for `key`.
    ///
    /// Only applied when `kline.is_closed`, or when it is the provisional
    /// update of an already-tracked in-progress bar — matching MarketFeed's
    /// rule that provisional bars never overwrite a different open_time.
    pub fn update(&self, key: KlineKey, kline: Kline) {
        let mut map = self.series.write();
        let ring = map
            .entry(key)
            .or_insert_with(|| VecDeque::with_capacity(self.capacity + 1));

        if let Some(last) = ring.back() {
            if !last.is_closed && last.open_time == kline.open_time {
                ring.pop_back();
            }
        }
        ring.push_back(kline);

        while ring.len() > self.capacity {
            ring.pop_front();
        }
    }

    /// Return the most recent `limit` **closed** klines, oldest-first.
    pub fn get_closed(&self, key: &KlineKey, limit: usize) -> Vec<Kline> {
        let map = self.series.read();
        match map.get(key) {
            Some(ring) => {
                let closed: Vec<&Kline> = ring.iter().filter(|k| k.is_closed).collect();
                let start = closed.len().saturating_sub(limit);
                closed[start..].iter().map(|k| (*k).clone()).collect()
            }
            None => Vec::new(),
        }
    }

    /// Return the most recent `limit` close prices from closed klines.
    pub fn get_closes(&self, key: &KlineKey, limit: usize) -> Vec<f64> {
        self.get_closed(key, limit).iter().map(|k| k.close).collect()
    }

    /// Close price of the most recent closed kline, if any.
    pub fn last_close(&self, key: &KlineKey) -> Option<f64> {
        let map = self.series.read();
        map.get(key)
            .and_then(|ring| ring.iter().rev().find(|k| k.is_closed).map(|k| k.close))
    }

    /// Total number of klines stored (including any in-progress bar).
    pub fn count(&self, key: &KlineKey) -> usize {
        let map = self.series.read();
        map.get(key).map_or(0, VecDeque::len)
    }

    /// Drop every series belonging to `symbol` (both intervals).
    pub fn remove_symbol(&self, symbol: &str) {
        let mut map = self.series.write();
        map.retain(|k, _| k.symbol != symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(open_time: i64, close: f64, is_closed: bool) -> Kline {
        Kline {
            open_time,
            close_time: open_time + 179_999,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
            quote_volume: 200.0,
            trades_count: 50,
            taker_buy_volume: 60.0,
            taker_buy_quote_volume: 120.0,
            is_closed,
        }
    }

    fn key(sym: &str, iv: &str) -> KlineKey {
        KlineKey {
            symbol: sym.into(),
            interval: iv.into(),
        }
    }

    #[test]
    fn ring_trims_to_capacity() {
        let ring = KlineRing::new(3);
        let k = key("BTCUSDT", "3m");
        for i in 0..5 {
            ring.update(k.clone(), sample(i * 180_000, 100.0 + i as f64, true));
        }
        assert_eq!(ring.count(&k), 3);
        assert_eq!(ring.get_closes(&k, 10), vec![102.0, 103.0, 104.0]);
    }

    #[test]
    fn in_progress_bar_replaced_in_place() {
        let ring = KlineRing::new(10);
        let k = key("ETHUSDT", "4h");

        ring.update(k.clone(), sample(0, 50.0, false));
        assert_eq!(ring.count(&k), 1);

        ring.update(k.clone(), sample(0, 51.0, false));
        assert_eq!(ring.count(&k), 1);

        ring.update(k.clone(), sample(0, 52.0, true));
        assert_eq!(ring.count(&k), 1);
        assert_eq!(ring.last_close(&k), Some(52.0));
    }

    #[test]
    fn get_closed_filters_out_in_progress() {
        let ring = KlineRing::new(10);
        let k = key("BTCUSDT", "3m");
        ring.update(k.clone(), sample(0, 100.0, true));
        ring.update(k.clone(), sample(180_000, 101.0, true));
        ring.update(k.clone(), sample(360_000, 102.0, false));

        assert_eq!(ring.get_closed(&k, 10).len(), 2);
    }

    #[test]
    fn last_close_empty_returns_none() {
        let ring = KlineRing::new(10);
        assert_eq!(ring.last_close(&key("XYZUSDT", "4h")), None);
    }

    #[test]
    fn remove_symbol_drops_all_its_intervals() {
        let ring = KlineRing::new(10);
        ring.update(key("BTCUSDT", "3m"), sample(0, 100.0, true));
        ring.update(key("BTCUSDT", "4h"), sample(0, 100.0, true));
        ring.update(key("ETHUSDT", "3m"), sample(0, 50.0, true));

        ring.remove_symbol("BTCUSDT");

        assert_eq!(ring.count(&key("BTCUSDT", "3m")), 0);
        assert_eq!(ring.count(&key("BTCUSDT", "4h")), 0);
        assert_eq!(ring.count(&key("ETHUSDT", "3m")), 1);
    }
}
