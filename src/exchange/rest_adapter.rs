// =============================================================================
// RestExchangeAdapter — ccxt-style REST/HMAC exchange adapter
// =============================================================================
//
// SECURITY: the secret key is never logged or serialized. Every signed
// request carries an API-key header and a recvWindow to tolerate minor
// clock drift, the same pattern as the teacher's BinanceClient.
// =============================================================================

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::types::{Position, Side};

use super::{to_stream_symbol, ExchangeAdapter, OrderOutcome};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW_MS: u64 = 5000;

/// Credentials loaded from the `exchanges` store table, never from the
/// environment (see SPEC_FULL §A.3).
pub struct ExchangeCredentials {
    pub api_key: String,
    pub secret_key: String,
    pub testnet: bool,
}

pub struct RestExchangeAdapter {
    base_url: String,
    futures_base_url: String,
    api_key: String,
    secret_key: String,
    client: reqwest::Client,
}

impl RestExchangeAdapter {
    pub fn new(creds: ExchangeCredentials) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&creds.api_key) {
            headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client for RestExchangeAdapter");

        let (base_url, futures_base_url) = if creds.testnet {
            (
                "https://testnet.binance.vision".to_string(),
                "https://testnet.binancefuture.com".to_string(),
            )
        } else {
            (
                "https://api.binance.com".to_string(),
                "https://fapi.binance.com".to_string(),
            )
        };

        Self {
            base_url,
            futures_base_url,
            api_key: creds.api_key,
            secret_key: creds.secret_key,
            client,
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW_MS}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW_MS}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    async fn place_futures_order(
        &self,
        symbol: &str,
        side: &str,
        position_side: &str,
        qty: f64,
    ) -> OrderOutcome {
        let binance_symbol = to_stream_symbol(symbol).to_uppercase();
        let params = format!(
            "symbol={binance_symbol}&side={side}&type=MARKET&quantity={qty}&positionSide={position_side}"
        );
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.futures_base_url, qs);

        match self.client.post(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(symbol = %binance_symbol, side, "order placed");
                OrderOutcome::ok("order accepted")
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!(symbol = %binance_symbol, %status, %body, "order rejected by exchange");
                OrderOutcome::failed(format!("exchange returned {status}"))
            }
            Err(e) => {
                warn!(symbol = %binance_symbol, error = %e, "order request failed");
                OrderOutcome::failed(e.to_string())
            }
        }
    }
}

#[async_trait]
impl ExchangeAdapter for RestExchangeAdapter {
    #[instrument(skip(self), name = "exchange::get_balance")]
    async fn get_balance(&self, asset: &str) -> Decimal {
        let qs = self.signed_query("");
        let url = format!("{}/fapi/v2/balance?{}", self.futures_base_url, qs);

        let body = match self.client.get(&url).send().await {
            Ok(resp) => resp.json::<serde_json::Value>().await.ok(),
            Err(e) => {
                warn!(asset, error = %e, "get_balance request failed");
                None
            }
        };

        let Some(array) = body.and_then(|v| v.as_array().cloned()) else {
            return Decimal::ZERO;
        };

        for entry in array {
            if entry.get("asset").and_then(|v| v.as_str()) == Some(asset) {
                if let Some(balance) = entry.get("balance").and_then(|v| v.as_str()) {
                    return balance.parse().unwrap_or(Decimal::ZERO);
                }
            }
        }
        Decimal::ZERO
    }

    #[instrument(skip(self), name = "exchange::get_positions")]
    async fn get_positions(&self) -> Vec<Position> {
        let qs = self.signed_query("");
        let url = format!("{}/fapi/v2/positionRisk?{}", self.futures_base_url, qs);

        let body = match self.client.get(&url).send().await {
            Ok(resp) => resp.json::<serde_json::Value>().await.ok(),
            Err(e) => {
                warn!(error = %e, "get_positions request failed");
                None
            }
        };

        let Some(array) = body.and_then(|v| v.as_array().cloned()) else {
            return Vec::new();
        };

        array
            .into_iter()
            .filter_map(|entry| {
                let qty: f64 = entry
                    .get("positionAmt")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0.0);
                if qty == 0.0 {
                    return None;
                }
                let symbol = entry.get("symbol").and_then(|v| v.as_str())?.to_string();
                let entry_price = entry
                    .get("entryPrice")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0.0);
                let unrealized_pnl = entry
                    .get("unRealizedProfit")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0.0);
                Some(Position {
                    symbol,
                    side: if qty > 0.0 { Side::Long } else { Side::Short },
                    quantity: qty.abs(),
                    entry_price,
                    unrealized_pnl,
                })
            })
            .collect()
    }

    async fn open_long(&self, symbol: &str, qty: f64, leverage: u32) -> OrderOutcome {
        self.set_leverage(symbol, leverage).await;
        self.place_futures_order(symbol, "BUY", "LONG", qty).await
    }

    async fn open_short(&self, symbol: &str, qty: f64, leverage: u32) -> OrderOutcome {
        self.set_leverage(symbol, leverage).await;
        self.place_futures_order(symbol, "SELL", "SHORT", qty).await
    }

    async fn close_long(&self, symbol: &str, qty: f64) -> OrderOutcome {
        let qty = if qty == 0.0 {
            let positions = self.get_positions().await;
            positions
                .into_iter()
                .find(|p| p.symbol == to_stream_symbol(symbol).to_uppercase() && p.side == Side::Long)
                .map(|p| p.quantity)
                .unwrap_or(0.0)
        } else {
            qty
        };
        if qty == 0.0 {
            return OrderOutcome::failed("no matching long position to close");
        }
        self.place_futures_order(symbol, "SELL", "LONG", qty).await
    }

    async fn close_short(&self, symbol: &str, qty: f64) -> OrderOutcome {
        let qty = if qty == 0.0 {
            let positions = self.get_positions().await;
            positions
                .into_iter()
                .find(|p| p.symbol == to_stream_symbol(symbol).to_uppercase() && p.side == Side::Short)
                .map(|p| p.quantity)
                .unwrap_or(0.0)
        } else {
            qty
        };
        if qty == 0.0 {
            return OrderOutcome::failed("no matching short position to close");
        }
        self.place_futures_order(symbol, "BUY", "SHORT", qty).await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> bool {
        let binance_symbol = to_stream_symbol(symbol).to_uppercase();
        let params = format!("symbol={binance_symbol}&leverage={leverage}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/leverage?{}", self.futures_base_url, qs);
        match self.client.post(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(symbol = %binance_symbol, error = %e, "set_leverage failed");
                false
            }
        }
    }

    async fn set_margin_mode(&self, symbol: &str, is_cross: bool) -> bool {
        let binance_symbol = to_stream_symbol(symbol).to_uppercase();
        let mode = if is_cross { "CROSSED" } else { "ISOLATED" };
        let params = format!("symbol={binance_symbol}&marginType={mode}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/marginType?{}", self.futures_base_url, qs);
        match self.client.post(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(symbol = %binance_symbol, error = %e, "set_margin_mode failed");
                false
            }
        }
    }

    async fn get_market_price(&self, symbol: &str) -> Option<f64> {
        let binance_symbol = to_stream_symbol(symbol).to_uppercase();
        let url = format!(
            "{}/fapi/v1/ticker/price?symbol={}",
            self.futures_base_url, binance_symbol
        );
        let resp = self.client.get(&url).send().await.ok()?;
        let body: serde_json::Value = resp.json().await.ok()?;
        body.get("price")?.as_str()?.parse().ok()
    }

    async fn set_stop_loss(&self, symbol: &str, price: f64) -> bool {
        let binance_symbol = to_stream_symbol(symbol).to_uppercase();
        let params = format!("symbol={binance_symbol}&type=STOP_MARKET&stopPrice={price}&closePosition=true");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.futures_base_url, qs);
        match self.client.post(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(symbol = %binance_symbol, error = %e, "set_stop_loss failed");
                false
            }
        }
    }

    async fn set_take_profit(&self, symbol: &str, price: f64) -> bool {
        let binance_symbol = to_stream_symbol(symbol).to_uppercase();
        let params = format!(
            "symbol={binance_symbol}&type=TAKE_PROFIT_MARKET&stopPrice={price}&closePosition=true"
        );
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.futures_base_url, qs);
        match self.client.post(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(symbol = %binance_symbol, error = %e, "set_take_profit failed");
                false
            }
        }
    }

    async fn cancel_all_orders(&self, symbol: &str) -> bool {
        let binance_symbol = to_stream_symbol(symbol).to_uppercase();
        let params = format!("symbol={binance_symbol}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/allOpenOrders?{}", self.futures_base_url, qs);
        match self.client.delete(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(symbol = %binance_symbol, error = %e, "cancel_all_orders failed");
                false
            }
        }
    }

    fn format_quantity(&self, _symbol: &str, qty: f64) -> f64 {
        // Binance futures lot steps vary per symbol; without a cached
        // exchangeInfo lookup we round to a conservative 3 decimal places.
        (qty * 1000.0).round() / 1000.0
    }

    async fn get_open_interest(&self, symbol: &str) -> Option<f64> {
        let binance_symbol = to_stream_symbol(symbol).to_uppercase();
        let url = format!(
            "{}/fapi/v1/openInterest?symbol={}",
            self.futures_base_url, binance_symbol
        );
        let resp = self.client.get(&url).send().await.ok()?;
        let body: serde_json::Value = resp.json().await.ok()?;
        body.get("openInterest")?.as_str()?.parse().ok()
    }

    async fn get_funding_rate(&self, symbol: &str) -> Option<f64> {
        let binance_symbol = to_stream_symbol(symbol).to_uppercase();
        let url = format!(
            "{}/fapi/v1/premiumIndex?symbol={}",
            self.futures_base_url, binance_symbol
        );
        let resp = self.client.get(&url).send().await.ok()?;
        let body: serde_json::Value = resp.json().await.ok()?;
        body.get("lastFundingRate")?.as_str()?.parse().ok()
    }
}

impl std::fmt::Debug for RestExchangeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestExchangeAdapter")
            .field("api_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_quantity_rounds_to_three_decimals() {
        let adapter = RestExchangeAdapter::new(ExchangeCredentials {
            api_key: "k".into(),
            secret_key: "s".into(),
            testnet: true,
        });
        assert_eq!(adapter.format_quantity("BTC/USDT", 1.23456), 1.235);
    }
}
