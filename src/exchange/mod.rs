// =============================================================================
// Exchange adapter interface
// =============================================================================
//
// The core depends on a single trait for every exchange-facing operation.
// The workspace ships one concrete adapter (`rest_adapter::RestExchangeAdapter`,
// a ccxt-style REST client); a wallet-signed DEX adapter is a drop-in
// implementer of the same trait and lives entirely outside core scope.
//
// Per the fixed contract, failures are reported as a default/empty value
// (0 balance, empty position list, `status: "error"` in an OrderOutcome) —
// never as a panic or an exception crossing this boundary. Internal
// transport errors are still logged by the concrete adapter before being
// collapsed to the default.
//
// Trait shape grounded on `AllanBico-zenith`'s `api-client` crate
// (`#[async_trait] trait ApiClient`); HMAC signing and JSON-over-HTTP
// conventions grounded on the teacher's `binance::client::BinanceClient`.
// =============================================================================

pub mod rest_adapter;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Position;

pub use rest_adapter::RestExchangeAdapter;

/// Outcome of an order-placement or order-management call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderOutcome {
    pub ok: bool,
    pub message: String,
}

impl OrderOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { ok: true, message: message.into() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { ok: false, message: message.into() }
    }
}

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Free balance for `asset`. Returns `Decimal::ZERO` on any failure.
    async fn get_balance(&self, asset: &str) -> Decimal;

    /// All currently open positions. Returns an empty vec on any failure.
    async fn get_positions(&self) -> Vec<Position>;

    async fn open_long(&self, symbol: &str, qty: f64, leverage: u32) -> OrderOutcome;
    async fn open_short(&self, symbol: &str, qty: f64, leverage: u32) -> OrderOutcome;

    /// `qty == 0.0` closes the entire position.
    async fn close_long(&self, symbol: &str, qty: f64) -> OrderOutcome;
    async fn close_short(&self, symbol: &str, qty: f64) -> OrderOutcome;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> bool;
    async fn set_margin_mode(&self, symbol: &str, is_cross: bool) -> bool;
    async fn get_market_price(&self, symbol: &str) -> Option<f64>;
    async fn set_stop_loss(&self, symbol: &str, price: f64) -> bool;
    async fn set_take_profit(&self, symbol: &str, price: f64) -> bool;
    async fn cancel_all_orders(&self, symbol: &str) -> bool;

    /// Round `qty` to the exchange's lot-size step for `symbol`.
    fn format_quantity(&self, symbol: &str, qty: f64) -> f64;

    /// Current open interest for `symbol`, or `None` on failure/unsupported.
    async fn get_open_interest(&self, symbol: &str) -> Option<f64>;

    /// Current funding rate for `symbol`, or `None` on failure/unsupported.
    async fn get_funding_rate(&self, symbol: &str) -> Option<f64>;
}

/// Convert `BASE/QUOTE` or the perpetual form `BASE/QUOTE:QUOTE` into the
/// lowercase symbol used by stream topics (`basequote`).
pub fn to_stream_symbol(symbol: &str) -> String {
    symbol
        .split(':')
        .next()
        .unwrap_or(symbol)
        .replace('/', "")
        .to_lowercase()
}

/// Strip `/`, `USDT`, and `:` and uppercase the residue — the classification
/// RiskValidator uses to decide between the BTC/ETH leverage cap and the
/// altcoin cap.
pub fn classify_base_asset(symbol: &str) -> String {
    symbol
        .to_uppercase()
        .replace('/', "")
        .replace("USDT", "")
        .replace(':', "")
}

#[cfg(test)]
mod symbol_tests {
    use super::*;

    #[test]
    fn stream_symbol_strips_slash_and_perp_suffix() {
        assert_eq!(to_stream_symbol("BTC/USDT"), "btcusdt");
        assert_eq!(to_stream_symbol("BTC/USDT:USDT"), "btcusdt");
    }

    #[test]
    fn classify_base_asset_strips_quote_and_perp_markers() {
        assert_eq!(classify_base_asset("BTC/USDT"), "BTC");
        assert_eq!(classify_base_asset("ETH/USDT:USDT"), "ETH");
        assert_eq!(classify_base_asset("DOGE/USDT"), "DOGE");
    }
}
