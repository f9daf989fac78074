// =============================================================================
// DataCollector — account state and market data collection (pipeline stage 2)
// =============================================================================
//
// Grounded on `original_source/decision_engine/nodes/data_collector.py`.
// Account balance/positions come from the exchange adapter, which already
// degrades to zero/empty on failure (see `exchange::ExchangeAdapter`'s
// contract), so this stage never needs its own retry logic around those
// calls.
// =============================================================================

use std::collections::HashMap;
use std::time::Duration;

use futures_util::future::join_all;
use rust_decimal::prelude::ToPrimitive;
use tracing::warn;

use crate::exchange::ExchangeAdapter;
use crate::market_data::MarketFeed;

use super::state::{AccountBalance, PipelineState, SymbolMarketData};

const SHORT_TF: &str = "3m";
const LONG_TF: &str = "4h";
const KLINE_LIMIT: usize = 200;

/// Total wall-clock budget for subscribing every newly-seen symbol this scan,
/// shared across however many symbols need it (spec §4.5.2).
const ADD_SYMBOL_TOTAL_BUDGET: Duration = Duration::from_secs(5);

pub async fn run(
    state: &mut PipelineState,
    adapter: &dyn ExchangeAdapter,
    feed: &MarketFeed,
) -> anyhow::Result<()> {
    let equity = adapter.get_balance("USDT").await.to_f64().unwrap_or(0.0);
    let positions = adapter.get_positions().await;

    let used_notional: f64 = positions.iter().map(|p| p.quantity.abs() * p.entry_price).sum();
    let margin_used_pct = if equity > 0.0 { used_notional / equity * 100.0 } else { 0.0 };

    state.account_balance = AccountBalance {
        equity,
        available: (equity - used_notional).max(0.0),
        margin_used_pct,
    };

    let position_symbols: Vec<String> = positions.iter().map(|p| p.symbol.clone()).collect();
    state.positions = positions;

    let mut all_symbols: Vec<String> = Vec::new();
    for symbol in position_symbols.iter().chain(state.candidate_symbols.iter()) {
        if !all_symbols.iter().any(|s| s == symbol) {
            all_symbols.push(symbol.clone());
        }
    }

    if all_symbols.is_empty() {
        state.market_data_map = HashMap::new();
        return Ok(());
    }

    let new_symbols: Vec<&String> =
        all_symbols.iter().filter(|s| !feed.is_monitoring(s)).collect();

    if !new_symbols.is_empty() {
        let intervals = [SHORT_TF, LONG_TF];
        let adds = new_symbols
            .iter()
            .map(|symbol| feed.add_symbol(symbol, &intervals, ADD_SYMBOL_TOTAL_BUDGET));

        if tokio::time::timeout(ADD_SYMBOL_TOTAL_BUDGET, join_all(adds)).await.is_err() {
            warn!(
                pending = new_symbols.len(),
                "add_symbol budget exhausted for this scan, some symbols remain REST-only"
            );
        }
    }

    let mut market_data_map = HashMap::with_capacity(all_symbols.len());

    for symbol in &all_symbols {
        let is_position = state.positions.iter().any(|p| &p.symbol == symbol);
        let is_candidate = state.candidate_symbols.iter().any(|s| s == symbol);
        let monitored = feed.is_monitoring(symbol);

        let klines_short = feed.get_klines(symbol, SHORT_TF, KLINE_LIMIT);
        let klines_long = feed.get_klines(symbol, LONG_TF, KLINE_LIMIT);

        let (current_price, source, error) = if monitored && !klines_short.is_empty() {
            let price = feed.get_latest_price(symbol).unwrap_or(0.0);
            (price, "stream_cache", None)
        } else {
            match adapter.get_market_price(symbol).await {
                Some(price) => (price, "rest", None),
                None => (0.0, "rest", Some("no price available from stream or REST".to_string())),
            }
        };

        market_data_map.insert(
            symbol.clone(),
            SymbolMarketData {
                klines_short,
                klines_long,
                current_price,
                source: source.to_string(),
                is_position,
                is_candidate,
                error,
            },
        );
    }

    state.market_data_map = market_data_map;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_and_long_timeframes_match_symbol_filter() {
        assert_eq!(SHORT_TF, "3m");
        assert_eq!(LONG_TF, "4h");
    }
}
