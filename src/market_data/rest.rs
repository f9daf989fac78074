// =============================================================================
// MarketFeed REST backfill
// =============================================================================
//
// `add_symbol` seeds a kline series with a REST fetch before (and
// independently of) the stream subscription catching up. This is public
// market data only — no signing, unlike the exchange adapter's account and
// order endpoints.
//
// Grounded on the teacher's `binance::client::get_klines` array-of-arrays
// parsing.
// =============================================================================

use anyhow::{Context, Result};
use tracing::warn;

use super::kline::Kline;

const KLINES_ENDPOINT: &str = "https://fapi.binance.com/fapi/v1/klines";

/// Fetch up to `limit` klines for `symbol`/`interval` from the public REST
/// endpoint, oldest-first. Every element except possibly the very last is
/// closed; Binance only returns the in-progress bar as the final element.
pub async fn fetch_klines(
    client: &reqwest::Client,
    symbol: &str,
    interval: &str,
    limit: u32,
) -> Result<Vec<Kline>> {
    let url = format!("{KLINES_ENDPOINT}?symbol={symbol}&interval={interval}&limit={limit}");

    let resp = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("GET klines for {symbol}/{interval} failed"))?;

    let status = resp.status();
    let body: serde_json::Value = resp
        .json()
        .await
        .context("failed to parse klines response")?;

    if !status.is_success() {
        anyhow::bail!("klines REST endpoint returned {}: {}", status, body);
    }

    let raw = body.as_array().context("klines response is not an array")?;
    let mut out = Vec::with_capacity(raw.len());
    let now_ms = chrono::Utc::now().timestamp_millis();

    for (idx, entry) in raw.iter().enumerate() {
        let arr = match entry.as_array() {
            Some(a) if a.len() >= 11 => a,
            _ => {
                warn!("skipping malformed kline entry for {symbol}/{interval}");
                continue;
            }
        };

        let open_time = arr[0].as_i64().unwrap_or(0);
        let close_time = arr[6].as_i64().unwrap_or(0);
        let is_closed = idx < raw.len() - 1 || close_time <= now_ms;

        out.push(Kline {
            open_time,
            close_time,
            open: parse_f64(&arr[1])?,
            high: parse_f64(&arr[2])?,
            low: parse_f64(&arr[3])?,
            close: parse_f64(&arr[4])?,
            volume: parse_f64(&arr[5])?,
            quote_volume: parse_f64(&arr[7])?,
            trades_count: arr[8].as_u64().unwrap_or(0),
            taker_buy_volume: parse_f64(&arr[9])?,
            taker_buy_quote_volume: parse_f64(&arr[10])?,
            is_closed,
        });
    }

    Ok(out)
}

fn parse_f64(val: &serde_json::Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}
