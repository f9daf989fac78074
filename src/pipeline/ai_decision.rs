// =============================================================================
// AIDecision — render the scan prompt and invoke the LLM collaborator (stage 4)
// =============================================================================
//
// Grounded on `original_source/decision_engine/nodes/AI_decision.py`: the
// prompt section order (account, performance, positions, candidates, OI-top,
// alerts, per-symbol features, leverage caps, decision-format contract)
// mirrors that module's formatting helpers. The structured-output-then-
// relaxed-retry parse itself lives in `llm::parse_decisions`, already wired
// into `llm::http_client::HttpLlmClient`; this stage only has to interpret
// the resulting [`LlmOutcome`].
// =============================================================================

use std::fmt::Write as _;

use tracing::{info, warn};

use crate::indicators::series::summarize as summarize_series;
use crate::llm::{LlmClient, LlmOutcome};

use super::state::{AiDecisionOutcome, PipelineState};

pub async fn run(state: &mut PipelineState, llm: &dyn LlmClient) -> anyhow::Result<()> {
    let user_prompt = render_prompt(state);

    match llm.decide(&state.trader_config.prompt_template, &user_prompt).await {
        LlmOutcome::Decisions(decisions) => {
            info!(count = decisions.len(), "AI collaborator returned decisions");
            state.ai_decision = AiDecisionOutcome { decisions, errors: Vec::new(), raw: String::new() };
        }
        LlmOutcome::Failed { error, raw_response } => {
            warn!(error = %error, "AI collaborator call failed, no decisions this scan");
            state.ai_decision =
                AiDecisionOutcome { decisions: Vec::new(), errors: vec![error], raw: raw_response };
        }
    }

    Ok(())
}

fn render_prompt(state: &PipelineState) -> String {
    let mut out = String::new();

    render_account_section(&mut out, state);
    render_performance_section(&mut out, state);
    render_positions_section(&mut out, state);
    render_candidates_section(&mut out, state);
    render_oi_top_section(&mut out, state);
    render_alerts_section(&mut out, state);
    render_features_section(&mut out, state);
    render_leverage_section(&mut out, state);
    render_decision_contract(&mut out);

    out
}

fn render_account_section(out: &mut String, state: &PipelineState) {
    let b = &state.account_balance;
    let _ = writeln!(
        out,
        "## Account\nequity_usd={:.2} available_usd={:.2} margin_used_pct={:.2}\n",
        b.equity, b.available, b.margin_used_pct
    );
}

fn render_performance_section(out: &mut String, state: &PipelineState) {
    let p = &state.performance;
    let sharpe = p.sharpe_ratio.map(|v| format!("{v:.3}")).unwrap_or_else(|| "n/a".to_string());
    let _ = writeln!(
        out,
        "## Recent performance\nsharpe_ratio={sharpe} win_rate={:.1}% total_trades={} avg_return={:.2} total_pnl={:.2}\n",
        p.win_rate, p.total_trades, p.avg_return, p.total_pnl
    );
}

fn render_positions_section(out: &mut String, state: &PipelineState) {
    let _ = writeln!(out, "## Open positions");
    if state.positions.is_empty() {
        let _ = writeln!(out, "(none)\n");
        return;
    }
    for p in &state.positions {
        let _ = writeln!(
            out,
            "- {} {} qty={} entry={} unrealized_pnl={:.2}",
            p.symbol, p.side, p.quantity, p.entry_price, p.unrealized_pnl
        );
    }
    out.push('\n');
}

fn render_candidates_section(out: &mut String, state: &PipelineState) {
    let _ = writeln!(out, "## Candidate symbols");
    if state.candidate_symbols.is_empty() {
        let _ = writeln!(out, "(none)\n");
        return;
    }
    for symbol in &state.candidate_symbols {
        let sources = state
            .coin_sources
            .get(symbol)
            .map(|tags| tags.join(","))
            .unwrap_or_default();
        let _ = writeln!(out, "- {symbol} (sources: {sources})");
    }
    out.push('\n');
}

fn render_oi_top_section(out: &mut String, state: &PipelineState) {
    if state.oi_top_data_map.is_empty() {
        return;
    }
    let _ = writeln!(out, "## OI top feed");
    for (symbol, entry) in &state.oi_top_data_map {
        let _ = writeln!(
            out,
            "- {symbol} oi_change={:.2} oi_change_percent={:.2}% time_range={}",
            entry.oi_change, entry.oi_change_percent, entry.time_range
        );
    }
    out.push('\n');
}

fn render_alerts_section(out: &mut String, state: &PipelineState) {
    let _ = writeln!(out, "## Alerts");
    if state.alerts.is_empty() {
        let _ = writeln!(out, "(none)\n");
        return;
    }
    for alert in &state.alerts {
        let _ = writeln!(out, "- [{}] {}: {}", alert.severity, alert.kind, alert.message);
    }
    out.push('\n');
}

fn render_features_section(out: &mut String, state: &PipelineState) {
    let _ = writeln!(out, "## Per-symbol features");
    for (symbol, f) in &state.signal_data_map {
        let _ = writeln!(
            out,
            "### {symbol}\nprice={:.4} chg_1h={:.2}% chg_4h={:.2}%",
            f.current_price, f.price_change_1h, f.price_change_4h
        );
        let _ = writeln!(
            out,
            "short_tf: ema20={:?} macd={:?} rsi7={:?} rsi14={:?}",
            f.short_tf.ema20, f.short_tf.macd, f.short_tf.rsi7, f.short_tf.rsi14
        );
        let _ = writeln!(
            out,
            "long_tf: ema20={:?} ema50={:?} macd={:?} rsi14={:?} atr14={:?} atr3={:?}",
            f.long_tf.ema20, f.long_tf.ema50, f.long_tf.macd, f.long_tf.rsi14, f.long_tf.atr14,
            f.long_tf.atr3
        );
        let _ = writeln!(
            out,
            "volume_4h: current={:.2} average={:.2}",
            f.current_volume_4h, f.average_volume_4h
        );
        let _ = writeln!(
            out,
            "open_interest={:?} oi_average={:?} funding_rate={:?}",
            f.open_interest, f.oi_average, f.funding_rate
        );

        if let Some(series) = &f.intraday_series {
            render_series_summary(out, "intraday", series);
        }
        if let Some(series) = &f.longer_term_series {
            render_series_summary(out, "longer_term", series);
        }
        out.push('\n');
    }
}

fn render_series_summary(out: &mut String, label: &str, series: &crate::indicators::series::SeriesBlock) {
    if let Some((first, last, min, max)) = summarize_series(&series.mid_prices) {
        let _ = writeln!(out, "{label}_price: first={first:.4} last={last:.4} min={min:.4} max={max:.4}");
    }
    if let Some((first, last, min, max)) = summarize_series(&series.rsi14) {
        let _ = writeln!(out, "{label}_rsi14: first={first:.2} last={last:.2} min={min:.2} max={max:.2}");
    }
}

fn render_leverage_section(out: &mut String, state: &PipelineState) {
    let _ = writeln!(
        out,
        "## Leverage caps\nbtc_eth_leverage={} altcoin_leverage={}\n",
        state.trader_config.btc_eth_leverage, state.trader_config.altcoin_leverage
    );
}

fn render_decision_contract(out: &mut String) {
    let _ = writeln!(
        out,
        "## Response format\nRespond with a JSON array of decision objects, one per symbol you act on. Each object: \
         {{\"symbol\": string, \"action\": one of open_long|open_short|close_long|close_short|hold|wait, \
         \"leverage\": number?, \"position_size_usd\": number?, \"stop_loss\": number?, \"take_profit\": number?, \
         \"risk_usd\": number?, \"confidence\": integer 0-100, \"reasoning\": string}}. \
         Do not include symbols you are not acting on. No prose outside the JSON."
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AiModelConfig, ExchangeConfig, SignalSourceConfig, SystemRiskConfig, TraderConfig};
    use uuid::Uuid;

    fn sample_config() -> TraderConfig {
        TraderConfig {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            name: "test-trader".into(),
            scan_interval_minutes: 5,
            ai_model: AiModelConfig {
                provider: "openai".into(),
                base_url: "https://example.invalid".into(),
                api_key: "key".into(),
                model_name: "gpt".into(),
            },
            exchange: ExchangeConfig {
                name: "binance".into(),
                api_key: "key".into(),
                secret_key: "secret".into(),
                testnet: true,
            },
            btc_eth_leverage: 10,
            altcoin_leverage: 3,
            signal_source: SignalSourceConfig::default(),
            trading_coins: vec!["BTC/USDT".into()],
            prompt_template: "be careful".into(),
            system: SystemRiskConfig::default(),
        }
    }

    #[test]
    fn prompt_includes_every_section_header() {
        let state = PipelineState::new(sample_config(), 0.0, 0);
        let prompt = render_prompt(&state);
        for header in [
            "## Account",
            "## Recent performance",
            "## Open positions",
            "## Candidate symbols",
            "## Alerts",
            "## Per-symbol features",
            "## Leverage caps",
            "## Response format",
        ] {
            assert!(prompt.contains(header), "missing section: {header}");
        }
    }

    #[test]
    fn empty_positions_render_as_none() {
        let state = PipelineState::new(sample_config(), 0.0, 0);
        let prompt = render_prompt(&state);
        assert!(prompt.contains("## Open positions\n(none)"));
    }
}
