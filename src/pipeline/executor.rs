// =============================================================================
// Executor — hand approved decisions to the exchange adapter (pipeline stage 6)
// =============================================================================
//
// Grounded on `original_source/decision_engine/nodes/execution_trade.py`.
// Per spec §4.5.6/§9 this is the order-placement contract, not a strategy:
// a missing price or adapter failure degrades to a `pending`/`error`
// ExecutionResult rather than aborting the scan.
// =============================================================================

use crate::exchange::ExchangeAdapter;
use crate::types::{Action, Decision, ExecutionResult};

use super::state::PipelineState;

pub async fn run(state: &mut PipelineState, adapter: &dyn ExchangeAdapter) -> anyhow::Result<()> {
    let mut results = Vec::with_capacity(state.approved.len());

    for decision in &state.approved {
        let result = match decision.action {
            Action::OpenLong | Action::OpenShort => execute_open(decision, adapter).await,
            Action::CloseLong => execute_close(decision, adapter, false).await,
            Action::CloseShort => execute_close(decision, adapter, true).await,
            Action::Hold | Action::Wait => ExecutionResult {
                symbol: decision.symbol.clone(),
                action: decision.action,
                status: "skipped".to_string(),
                message: "no order placed for hold/wait".to_string(),
            },
        };
        results.push(result);
    }

    state.execution_results = results;

    Ok(())
}

async fn execute_open(decision: &Decision, adapter: &dyn ExchangeAdapter) -> ExecutionResult {
    let (Some(leverage), Some(position_size_usd)) = (decision.leverage, decision.position_size_usd) else {
        return ExecutionResult {
            symbol: decision.symbol.clone(),
            action: decision.action,
            status: "error".to_string(),
            message: "missing leverage or position_size_usd after validation".to_string(),
        };
    };

    let Some(price) = adapter.get_market_price(&decision.symbol).await else {
        return ExecutionResult {
            symbol: decision.symbol.clone(),
            action: decision.action,
            status: "pending".to_string(),
            message: "no market price available, order deferred".to_string(),
        };
    };
    if price <= 0.0 {
        return ExecutionResult {
            symbol: decision.symbol.clone(),
            action: decision.action,
            status: "error".to_string(),
            message: "non-positive market price".to_string(),
        };
    }

    let qty = adapter.format_quantity(&decision.symbol, position_size_usd / price);

    adapter.set_leverage(&decision.symbol, leverage).await;

    let outcome = match decision.action {
        Action::OpenLong => adapter.open_long(&decision.symbol, qty, leverage).await,
        Action::OpenShort => adapter.open_short(&decision.symbol, qty, leverage).await,
        _ => unreachable!("only open actions reach execute_open"),
    };

    if outcome.ok {
        if let Some(stop) = decision.stop_loss {
            adapter.set_stop_loss(&decision.symbol, stop).await;
        }
        if let Some(take) = decision.take_profit {
            adapter.set_take_profit(&decision.symbol, take).await;
        }
    }

    ExecutionResult {
        symbol: decision.symbol.clone(),
        action: decision.action,
        status: if outcome.ok { "success".to_string() } else { "error".to_string() },
        message: outcome.message,
    }
}

async fn execute_close(decision: &Decision, adapter: &dyn ExchangeAdapter, is_short: bool) -> ExecutionResult {
    let outcome = if is_short {
        adapter.close_short(&decision.symbol, 0.0).await
    } else {
        adapter.close_long(&decision.symbol, 0.0).await
    };

    ExecutionResult {
        symbol: decision.symbol.clone(),
        action: decision.action,
        status: if outcome.ok { "success".to_string() } else { "error".to_string() },
        message: outcome.message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::OrderOutcome;
    use crate::types::Position;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct MockAdapter {
        price: Option<f64>,
        open_ok: bool,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ExchangeAdapter for MockAdapter {
        async fn get_balance(&self, _asset: &str) -> rust_decimal::Decimal {
            rust_decimal::Decimal::ZERO
        }
        async fn get_positions(&self) -> Vec<Position> {
            Vec::new()
        }
        async fn open_long(&self, symbol: &str, qty: f64, leverage: u32) -> OrderOutcome {
            self.calls.lock().push(format!("open_long {symbol} {qty} {leverage}"));
            if self.open_ok { OrderOutcome::ok("filled") } else { OrderOutcome::failed("rejected") }
        }
        async fn open_short(&self, symbol: &str, qty: f64, leverage: u32) -> OrderOutcome {
            self.calls.lock().push(format!("open_short {symbol} {qty} {leverage}"));
            if self.open_ok { OrderOutcome::ok("filled") } else { OrderOutcome::failed("rejected") }
        }
        async fn close_long(&self, symbol: &str, _qty: f64) -> OrderOutcome {
            self.calls.lock().push(format!("close_long {symbol}"));
            OrderOutcome::ok("closed")
        }
        async fn close_short(&self, symbol: &str, _qty: f64) -> OrderOutcome {
            self.calls.lock().push(format!("close_short {symbol}"));
            OrderOutcome::ok("closed")
        }
        async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> bool {
            true
        }
        async fn set_margin_mode(&self, _symbol: &str, _is_cross: bool) -> bool {
            true
        }
        async fn get_market_price(&self, _symbol: &str) -> Option<f64> {
            self.price
        }
        async fn set_stop_loss(&self, _symbol: &str, _price: f64) -> bool {
            true
        }
        async fn set_take_profit(&self, _symbol: &str, _price: f64) -> bool {
            true
        }
        async fn cancel_all_orders(&self, _symbol: &str) -> bool {
            true
        }
        fn format_quantity(&self, _symbol: &str, qty: f64) -> f64 {
            qty
        }
        async fn get_open_interest(&self, _symbol: &str) -> Option<f64> {
            None
        }
        async fn get_funding_rate(&self, _symbol: &str) -> Option<f64> {
            None
        }
    }

    fn decision(symbol: &str, action: Action) -> Decision {
        Decision {
            symbol: symbol.to_string(),
            action,
            leverage: Some(5),
            position_size_usd: Some(200.0),
            stop_loss: Some(95.0),
            take_profit: Some(115.0),
            risk_usd: None,
            confidence: 80,
            reasoning: "test".into(),
        }
    }

    #[tokio::test]
    async fn open_long_with_valid_price_succeeds() {
        let adapter = MockAdapter { price: Some(100.0), open_ok: true, calls: Mutex::new(Vec::new()) };
        let d = decision("BTC/USDT", Action::OpenLong);
        let result = execute_open(&d, &adapter).await;
        assert_eq!(result.status, "success");
        assert!(adapter.calls.lock().iter().any(|c| c.starts_with("open_long")));
    }

    #[tokio::test]
    async fn open_without_price_is_pending() {
        let adapter = MockAdapter { price: None, open_ok: true, calls: Mutex::new(Vec::new()) };
        let d = decision("BTC/USDT", Action::OpenLong);
        let result = execute_open(&d, &adapter).await;
        assert_eq!(result.status, "pending");
    }

    #[tokio::test]
    async fn rejected_order_reports_error_status() {
        let adapter = MockAdapter { price: Some(100.0), open_ok: false, calls: Mutex::new(Vec::new()) };
        let d = decision("BTC/USDT", Action::OpenShort);
        let result = execute_open(&d, &adapter).await;
        assert_eq!(result.status, "error");
    }

    #[tokio::test]
    async fn hold_and_wait_are_skipped_without_adapter_calls() {
        let adapter = MockAdapter { price: Some(100.0), open_ok: true, calls: Mutex::new(Vec::new()) };
        let mut state = super::super::state::PipelineState::new(
            crate::config::TraderConfig {
                id: uuid::Uuid::nil(),
                user_id: uuid::Uuid::nil(),
                name: "t".into(),
                scan_interval_minutes: 5,
                ai_model: crate::config::AiModelConfig {
                    provider: "openai".into(),
                    base_url: "https://example.invalid".into(),
                    api_key: "k".into(),
                    model_name: "gpt".into(),
                },
                exchange: crate::config::ExchangeConfig {
                    name: "binance".into(),
                    api_key: "k".into(),
                    secret_key: "s".into(),
                    testnet: true,
                },
                btc_eth_leverage: 10,
                altcoin_leverage: 3,
                signal_source: crate::config::SignalSourceConfig::default(),
                trading_coins: vec!["BTC/USDT".into()],
                prompt_template: "p".into(),
                system: crate::config::SystemRiskConfig::default(),
            },
            0.0,
            0,
        );
        state.approved = vec![decision("ETH/USDT", Action::Wait)];
        run(&mut state, &adapter).await.unwrap();
        assert_eq!(state.execution_results[0].status, "skipped");
        assert!(adapter.calls.lock().is_empty());
    }
}
