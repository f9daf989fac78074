// =============================================================================
// CoinPool — candidate symbol selection (pipeline stage 1)
// =============================================================================
//
// Unions three symbol sources in a fixed order and falls back to configured
// defaults when all three are empty. Grounded on
// `original_source/decision_engine/nodes/coin_pool.py`; the wait policy for
// the internal SymbolFilter (120s max, 2s poll, 10s log cadence) supersedes
// the source's 600s wait per spec §4.5.1 (DESIGN.md Open Question 1).
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::symbol_filter::SymbolFilter;

use super::state::{OiTopEntry, PipelineState};

const COIN_POOL_TAG: &str = "ai500";
const OI_TOP_TAG: &str = "oi_top";
const INSIDE_AI_TAG: &str = "inside_ai";
const FALLBACK_TAG: &str = "fallback";

const FEED_TIMEOUT: Duration = Duration::from_secs(10);
const FILTER_WAIT_MAX: Duration = Duration::from_secs(120);
const FILTER_POLL_INTERVAL: Duration = Duration::from_secs(2);
const FILTER_LOG_INTERVAL: Duration = Duration::from_secs(10);

pub async fn run(
    state: &mut PipelineState,
    http: &reqwest::Client,
    symbol_filter: Option<&SymbolFilter>,
) -> anyhow::Result<()> {
    let mut ordered: Vec<String> = Vec::new();
    let mut sources: HashMap<String, Vec<String>> = HashMap::new();
    let mut oi_top_map: HashMap<String, OiTopEntry> = HashMap::new();

    let signal_source = state.trader_config.signal_source.clone();

    if signal_source.use_coin_pool {
        if let Some(url) = &signal_source.coin_pool_url {
            let entries = fetch_feed(http, url).await;
            for (symbol, _) in entries {
                push_symbol(&mut ordered, &mut sources, &symbol, COIN_POOL_TAG);
            }
        }
    }

    if signal_source.use_oi_top {
        if let Some(url) = &signal_source.oi_top_url {
            let entries = fetch_feed(http, url).await;
            for (symbol, oi_entry) in entries {
                push_symbol(&mut ordered, &mut sources, &symbol, OI_TOP_TAG);
                if let Some(oi_entry) = oi_entry {
                    oi_top_map.insert(symbol, oi_entry);
                }
            }
        }
    }

    if signal_source.use_inside_coins {
        for symbol in wait_for_symbol_filter(symbol_filter).await {
            push_symbol(&mut ordered, &mut sources, &symbol, INSIDE_AI_TAG);
        }
    }

    if ordered.is_empty() {
        let fallback = if !state.trader_config.trading_coins.is_empty() {
            state.trader_config.trading_coins.clone()
        } else {
            vec!["BTC/USDT".to_string()]
        };
        for symbol in fallback {
            push_symbol(&mut ordered, &mut sources, &symbol, FALLBACK_TAG);
        }
    }

    info!(count = ordered.len(), "coin pool selected candidates");

    state.candidate_symbols = ordered;
    state.coin_sources = sources;
    state.oi_top_data_map = oi_top_map;

    Ok(())
}

/// Insert preserving first-seen order (invariant I4) and record the source
/// tag regardless of whether the symbol was already present.
fn push_symbol(
    ordered: &mut Vec<String>,
    sources: &mut HashMap<String, Vec<String>>,
    symbol: &str,
    tag: &'static str,
) {
    if !ordered.iter().any(|s| s == symbol) {
        ordered.push(symbol.to_string());
    }
    sources.entry(symbol.to_string()).or_default().push(tag.to_string());
}

async fn wait_for_symbol_filter(symbol_filter: Option<&SymbolFilter>) -> Vec<String> {
    let Some(filter) = symbol_filter else {
        return Vec::new();
    };

    let first = filter.get_filtered_symbols();
    if !first.is_empty() {
        return first;
    }
    if !filter.is_running() {
        return Vec::new();
    }

    let started = Instant::now();
    let mut last_log = Instant::now();
    loop {
        tokio::time::sleep(FILTER_POLL_INTERVAL).await;

        let symbols = filter.get_filtered_symbols();
        if !symbols.is_empty() {
            return symbols;
        }

        if started.elapsed() >= FILTER_WAIT_MAX {
            warn!("symbol filter produced no list within the wait window, falling through");
            return Vec::new();
        }

        if last_log.elapsed() >= FILTER_LOG_INTERVAL {
            debug!(
                waited_secs = started.elapsed().as_secs(),
                "still waiting for symbol filter's first publication"
            );
            last_log = Instant::now();
        }
    }
}

/// GET `url` and extract a list of `(symbol, oi_entry)` pairs, tolerating
/// either a bare array or an object wrapping one of `coins`/`data`/`positions`.
/// Any transport or shape failure degrades to an empty list (§7 TransientExternal).
async fn fetch_feed(client: &reqwest::Client, url: &str) -> Vec<(String, Option<OiTopEntry>)> {
    let response = match client.get(url).timeout(FEED_TIMEOUT).send().await {
        Ok(resp) => resp,
        Err(e) => {
            warn!(url, error = %e, "signal feed request failed");
            return Vec::new();
        }
    };

    if !response.status().is_success() {
        warn!(url, status = %response.status(), "signal feed returned an error status");
        return Vec::new();
    }

    match response.json::<Value>().await {
        Ok(value) => extract_entries(&value),
        Err(e) => {
            warn!(url, error = %e, "signal feed returned unparseable JSON");
            Vec::new()
        }
    }
}

fn extract_entries(value: &Value) -> Vec<(String, Option<OiTopEntry>)> {
    match value {
        Value::Array(items) => items.iter().filter_map(entry_from_value).collect(),
        Value::Object(map) => {
            for key in ["coins", "data", "positions"] {
                if let Some(Value::Array(items)) = map.get(key) {
                    return items.iter().filter_map(entry_from_value).collect();
                }
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

fn entry_from_value(value: &Value) -> Option<(String, Option<OiTopEntry>)> {
    match value {
        Value::String(symbol) => Some((symbol.clone(), None)),
        Value::Object(obj) => {
            let symbol = obj.get("symbol").and_then(Value::as_str)?.to_string();
            let has_oi_fields =
                obj.contains_key("oi_change") || obj.contains_key("oi_change_percent");
            let oi_entry = has_oi_fields.then(|| OiTopEntry {
                oi_change: obj.get("oi_change").and_then(Value::as_f64).unwrap_or(0.0),
                oi_change_percent: obj
                    .get("oi_change_percent")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0),
                time_range: obj
                    .get("time_range")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
            });
            Some((symbol, oi_entry))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_entries_accepts_bare_string_array() {
        let value: Value = serde_json::json!(["BTC/USDT", "ETH/USDT"]);
        let entries = extract_entries(&value);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "BTC/USDT");
        assert!(entries[0].1.is_none());
    }

    #[test]
    fn extract_entries_reads_wrapped_data_key() {
        let value: Value = serde_json::json!({"data": [{"symbol": "DOGE/USDT"}]});
        let entries = extract_entries(&value);
        assert_eq!(entries[0].0, "DOGE/USDT");
    }

    #[test]
    fn extract_entries_parses_oi_top_fields() {
        let value: Value = serde_json::json!({
            "coins": [{"symbol": "BTC/USDT", "oi_change": 1.5, "oi_change_percent": 3.2, "time_range": "1h"}]
        });
        let entries = extract_entries(&value);
        let oi = entries[0].1.as_ref().unwrap();
        assert_eq!(oi.oi_change, 1.5);
        assert_eq!(oi.time_range, "1h");
    }

    #[test]
    fn extract_entries_unknown_shape_is_empty() {
        let value: Value = serde_json::json!({"unexpected": 1});
        assert!(extract_entries(&value).is_empty());
    }

    #[test]
    fn push_symbol_dedups_preserving_first_seen_order() {
        let mut ordered = Vec::new();
        let mut sources = HashMap::new();
        push_symbol(&mut ordered, &mut sources, "BTC/USDT", COIN_POOL_TAG);
        push_symbol(&mut ordered, &mut sources, "ETH/USDT", OI_TOP_TAG);
        push_symbol(&mut ordered, &mut sources, "BTC/USDT", INSIDE_AI_TAG);

        assert_eq!(ordered, vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()]);
        assert_eq!(sources["BTC/USDT"], vec![COIN_POOL_TAG, INSIDE_AI_TAG]);
    }
}
