// =============================================================================
// RiskValidator — hard constraint enforcement (pipeline stage 5)
// =============================================================================
//
// Grounded on `original_source/decision_engine/nodes/Risk_check.py`: constant
// names and thresholds (MAX_MARGIN_USED_PCT, MIN_RISK_REWARD_RATIO, the
// 10x/1.5x position multipliers) are carried over verbatim from that module.
// =============================================================================

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;
use uuid::Uuid;

use crate::exchange::classify_base_asset;
use crate::llm::RawDecision;
use crate::store::StoreRepository;
use crate::types::{Action, Decision, DecisionLogRecord, Side};

use super::state::PipelineState;

const MAX_MARGIN_USED_PCT: f64 = 80.0;
const MIN_RISK_REWARD_RATIO: f64 = 3.0;
const MAJOR_POSITION_MULTIPLIER: f64 = 10.0;
const ALTCOIN_POSITION_MULTIPLIER: f64 = 1.5;

pub async fn run(state: &mut PipelineState, repo: &StoreRepository, trader_id: Uuid) -> anyhow::Result<()> {
    let raw_decisions = state.ai_decision.decisions.clone();
    let mut validated: Vec<Decision> = Vec::new();
    let mut errors: Vec<String> = Vec::new();

    for raw in &raw_decisions {
        let Some(action) = parse_action(&raw.action) else {
            errors.push(format!("{}: invalid action '{}'", raw.symbol, raw.action));
            continue;
        };

        let outcome = match action {
            Action::OpenLong | Action::OpenShort => {
                let current_price = state.market_data_map.get(&raw.symbol).map(|d| d.current_price);
                validate_open(raw, action, state, current_price)
            }
            Action::CloseLong | Action::CloseShort => validate_close(raw, action, &state.positions),
            Action::Hold | Action::Wait => Ok(passthrough_decision(raw, action)),
        };

        match outcome {
            Ok(decision) => validated.push(decision),
            Err(e) => errors.push(e),
        }
    }

    if validated.iter().any(|d| d.action.is_open()) {
        let equity_ok = state.account_balance.equity > 0.0;
        let margin_ok = state.account_balance.margin_used_pct < MAX_MARGIN_USED_PCT;
        if !equity_ok || !margin_ok {
            let reason = format!(
                "account risk gate failed: equity={:.2} margin_used_pct={:.2}",
                state.account_balance.equity, state.account_balance.margin_used_pct
            );
            warn!(reason = %reason, "dropping all open-type decisions this scan");
            errors.push(reason);
            validated.retain(|d| !d.action.is_open());
        }
    }

    state.validation_errors = errors;
    state.risk_approved = !validated.is_empty();

    for decision in &validated {
        let record = build_log_record(trader_id, decision, state);
        if let Err(e) = repo.insert_decision_log(&record).await {
            warn!(error = %e, symbol = %decision.symbol, "failed to persist decision log");
        }
    }

    state.approved = validated;

    Ok(())
}

fn parse_action(raw: &str) -> Option<Action> {
    match raw {
        "open_long" => Some(Action::OpenLong),
        "open_short" => Some(Action::OpenShort),
        "close_long" => Some(Action::CloseLong),
        "close_short" => Some(Action::CloseShort),
        "hold" => Some(Action::Hold),
        "wait" => Some(Action::Wait),
        _ => None,
    }
}

fn passthrough_decision(raw: &RawDecision, action: Action) -> Decision {
    Decision {
        symbol: raw.symbol.clone(),
        action,
        leverage: None,
        position_size_usd: None,
        stop_loss: None,
        take_profit: None,
        risk_usd: None,
        confidence: raw.confidence,
        reasoning: raw.reasoning.clone(),
    }
}

fn validate_open(
    raw: &RawDecision,
    action: Action,
    state: &PipelineState,
    current_price: Option<f64>,
) -> Result<Decision, String> {
    let leverage = raw
        .leverage
        .filter(|&l| l > 0)
        .ok_or_else(|| format!("{}: missing or non-positive leverage", raw.symbol))?;
    let position_size_usd = raw
        .position_size_usd
        .filter(|&v| v > 0.0)
        .ok_or_else(|| format!("{}: missing or non-positive position_size_usd", raw.symbol))?;
    let stop_loss = raw
        .stop_loss
        .filter(|&v| v > 0.0)
        .ok_or_else(|| format!("{}: missing or non-positive stop_loss", raw.symbol))?;
    let take_profit = raw
        .take_profit
        .filter(|&v| v > 0.0)
        .ok_or_else(|| format!("{}: missing or non-positive take_profit", raw.symbol))?;

    if let Some(risk_usd) = raw.risk_usd {
        if risk_usd <= 0.0 {
            return Err(format!("{}: risk_usd must be positive when present", raw.symbol));
        }
    }

    let is_major = matches!(classify_base_asset(&raw.symbol).as_str(), "BTC" | "ETH");
    let leverage_cap =
        if is_major { state.trader_config.btc_eth_leverage } else { state.trader_config.altcoin_leverage };
    if leverage > leverage_cap {
        return Err(format!("{}: leverage {leverage} exceeds cap {leverage_cap}", raw.symbol));
    }

    let position_multiplier =
        if is_major { MAJOR_POSITION_MULTIPLIER } else { ALTCOIN_POSITION_MULTIPLIER };
    let position_cap = position_multiplier * state.account_balance.equity;
    if position_size_usd > position_cap {
        return Err(format!(
            "{}: position_size_usd {position_size_usd:.2} exceeds {position_multiplier:.1}x equity cap ({position_cap:.2})",
            raw.symbol
        ));
    }

    match action {
        Action::OpenLong if stop_loss >= take_profit => {
            return Err(format!("{}: stop_loss must be below take_profit for a long", raw.symbol));
        }
        Action::OpenShort if stop_loss <= take_profit => {
            return Err(format!("{}: stop_loss must be above take_profit for a short", raw.symbol));
        }
        _ => {}
    }

    let price = current_price
        .ok_or_else(|| format!("{}: no current price available for risk/reward check", raw.symbol))?;

    let (risk, reward) = match action {
        Action::OpenLong => (price - stop_loss, take_profit - price),
        Action::OpenShort => (stop_loss - price, price - take_profit),
        _ => unreachable!("only open actions reach this branch"),
    };

    if risk <= 0.0 {
        return Err(format!("{}: non-positive risk distance", raw.symbol));
    }
    let rr = reward / risk;
    if rr < MIN_RISK_REWARD_RATIO {
        return Err(format!(
            "{}: risk/reward {rr:.2} below {MIN_RISK_REWARD_RATIO:.1} minimum",
            raw.symbol
        ));
    }

    Ok(Decision {
        symbol: raw.symbol.clone(),
        action,
        leverage: Some(leverage),
        position_size_usd: Some(position_size_usd),
        stop_loss: Some(stop_loss),
        take_profit: Some(take_profit),
        risk_usd: raw.risk_usd,
        confidence: raw.confidence,
        reasoning: raw.reasoning.clone(),
    })
}

fn validate_close(
    raw: &RawDecision,
    action: Action,
    positions: &[crate::types::Position],
) -> Result<Decision, String> {
    let required_side = match action {
        Action::CloseLong => Side::Long,
        Action::CloseShort => Side::Short,
        _ => unreachable!("only close actions reach this branch"),
    };

    let has_match = positions.iter().any(|p| p.symbol == raw.symbol && p.side == required_side);
    if !has_match {
        return Err(format!("{}: direction mismatch, no matching {required_side} position", raw.symbol));
    }

    Ok(passthrough_decision(raw, action))
}

fn build_log_record(trader_id: Uuid, decision: &Decision, state: &PipelineState) -> DecisionLogRecord {
    let snapshot = serde_json::json!({
        "candidate_symbols": state.candidate_symbols,
        "positions": state.positions,
        "account_balance": {
            "equity": state.account_balance.equity,
            "available": state.account_balance.available,
            "margin_used_pct": state.account_balance.margin_used_pct,
        },
        "market_data_symbols": state.market_data_map.keys().collect::<Vec<_>>(),
        "signal_data_symbols": state.signal_data_map.keys().collect::<Vec<_>>(),
        "call_count": state.call_count,
        "runtime_minutes": state.runtime_minutes,
        "risk_approved": state.risk_approved,
        "validation_errors": state.validation_errors,
    });

    let raw_confidence = Decimal::from(decision.confidence);
    let confidence = if raw_confidence > dec!(1) { raw_confidence / dec!(100) } else { raw_confidence };

    DecisionLogRecord {
        trader_id,
        symbol: decision.symbol.clone(),
        state_snapshot: snapshot,
        decision_result: decision.action.to_string(),
        reasoning: decision.reasoning.clone(),
        confidence,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AiModelConfig, ExchangeConfig, SignalSourceConfig, SystemRiskConfig, TraderConfig};
    use crate::pipeline::state::{AccountBalance, SymbolMarketData};
    use crate::types::Position;

    fn config() -> TraderConfig {
        TraderConfig {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            name: "test".into(),
            scan_interval_minutes: 5,
            ai_model: AiModelConfig {
                provider: "openai".into(),
                base_url: "https://example.invalid".into(),
                api_key: "k".into(),
                model_name: "gpt".into(),
            },
            exchange: ExchangeConfig { name: "binance".into(), api_key: "k".into(), secret_key: "s".into(), testnet: true },
            btc_eth_leverage: 10,
            altcoin_leverage: 3,
            signal_source: SignalSourceConfig::default(),
            trading_coins: vec!["BTC/USDT".into()],
            prompt_template: "prompt".into(),
            system: SystemRiskConfig::default(),
        }
    }

    fn market_data(symbol: &str, price: f64) -> SymbolMarketData {
        SymbolMarketData {
            klines_short: Vec::new(),
            klines_long: Vec::new(),
            current_price: price,
            source: "rest".into(),
            is_position: false,
            is_candidate: true,
            error: None,
        }
    }

    fn decision(symbol: &str, action: &str, leverage: Option<u32>, size: Option<f64>, stop: Option<f64>, take: Option<f64>) -> RawDecision {
        RawDecision {
            symbol: symbol.into(),
            action: action.into(),
            leverage,
            position_size_usd: size,
            stop_loss: stop,
            take_profit: take,
            confidence: 80,
            risk_usd: None,
            reasoning: "test".into(),
        }
    }

    #[test]
    fn long_decision_with_rr_3_is_accepted() {
        let mut state = PipelineState::new(config(), 0.0, 0);
        state.account_balance = AccountBalance { equity: 1000.0, available: 1000.0, margin_used_pct: 0.0 };
        state.market_data_map.insert("BTC/USDT".into(), market_data("BTC/USDT", 100.0));
        let raw = decision("BTC/USDT", "open_long", Some(5), Some(200.0), Some(95.0), Some(115.0));

        let result = validate_open(&raw, Action::OpenLong, &state, Some(100.0));
        assert!(result.is_ok());
    }

    #[test]
    fn long_decision_below_rr_3_is_rejected() {
        let mut state = PipelineState::new(config(), 0.0, 0);
        state.account_balance = AccountBalance { equity: 1000.0, available: 1000.0, margin_used_pct: 0.0 };
        state.market_data_map.insert("BTC/USDT".into(), market_data("BTC/USDT", 100.0));
        let raw = decision("BTC/USDT", "open_long", Some(5), Some(200.0), Some(95.0), Some(110.0));

        let result = validate_open(&raw, Action::OpenLong, &state, Some(100.0));
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("risk/reward"));
    }

    #[test]
    fn altcoin_over_leverage_position_is_rejected() {
        let mut state = PipelineState::new(config(), 0.0, 0);
        state.account_balance = AccountBalance { equity: 1000.0, available: 1000.0, margin_used_pct: 0.0 };
        state.market_data_map.insert("DOGE/USDT".into(), market_data("DOGE/USDT", 1.0));
        let raw = decision("DOGE/USDT", "open_long", Some(2), Some(2000.0), Some(0.9), Some(1.5));

        let result = validate_open(&raw, Action::OpenLong, &state, Some(1.0));
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("equity cap"));
    }

    #[test]
    fn close_without_matching_position_is_rejected() {
        let positions = vec![Position {
            symbol: "ETH/USDT".into(),
            side: Side::Short,
            quantity: 1.0,
            entry_price: 2000.0,
            unrealized_pnl: 0.0,
        }];
        let raw = decision("ETH/USDT", "close_long", None, None, None, None);

        let result = validate_close(&raw, Action::CloseLong, &positions);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("direction mismatch"));
    }

    #[test]
    fn close_with_matching_position_is_accepted() {
        let positions = vec![Position {
            symbol: "ETH/USDT".into(),
            side: Side::Long,
            quantity: 1.0,
            entry_price: 2000.0,
            unrealized_pnl: 0.0,
        }];
        let raw = decision("ETH/USDT", "close_long", None, None, None, None);

        assert!(validate_close(&raw, Action::CloseLong, &positions).is_ok());
    }

    #[test]
    fn confidence_above_one_is_normalized_to_0_1_scale() {
        let state = PipelineState::new(config(), 0.0, 0);
        let decision = Decision {
            symbol: "BTC/USDT".into(),
            action: Action::Wait,
            leverage: None,
            position_size_usd: None,
            stop_loss: None,
            take_profit: None,
            risk_usd: None,
            confidence: 83,
            reasoning: "test".into(),
        };
        let record = build_log_record(Uuid::nil(), &decision, &state);
        assert_eq!(record.confidence, Decimal::new(83, 2));
    }
}
