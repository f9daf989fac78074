// =============================================================================
// SignalAnalyzer — feature computation, liquidity gate, alerts (stage 3)
// =============================================================================
//
// Grounded on `original_source/decision_engine/nodes/signal_analyzer.py`.
// The $15M/$5M liquidity gate thresholds are named explicitly in spec
// §4.5.3 and supersede the source, which has no such gate at all
// (DESIGN.md Open Question 2).
// =============================================================================

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::exchange::ExchangeAdapter;
use crate::feature_engine::{calculate_features, MarketFeatures};
use crate::performance;
use crate::store::StoreRepository;

use super::state::{Alert, PipelineState};

const NEW_CANDIDATE_LIQUIDITY_THRESHOLD_USD: f64 = 15_000_000.0;
const HELD_LIQUIDITY_THRESHOLD_USD: f64 = 5_000_000.0;

pub async fn run(
    state: &mut PipelineState,
    adapter: &dyn ExchangeAdapter,
    repo: &StoreRepository,
    trader_id: Uuid,
) -> anyhow::Result<()> {
    let symbols: Vec<String> = state.market_data_map.keys().cloned().collect();
    let mut signal_data_map = HashMap::with_capacity(symbols.len());

    for symbol in symbols {
        let data = &state.market_data_map[&symbol];
        if data.error.is_some() {
            continue;
        }

        let Some(features) =
            calculate_features(&symbol, &data.klines_short, &data.klines_long, Some(adapter), false)
                .await
        else {
            continue;
        };

        let threshold = if data.is_position {
            HELD_LIQUIDITY_THRESHOLD_USD
        } else {
            NEW_CANDIDATE_LIQUIDITY_THRESHOLD_USD
        };

        let passes_liquidity_gate = match features.open_interest {
            Some(oi) => oi * features.current_price >= threshold,
            // Missing OI: tolerate for positions already held (avoid a
            // spurious forced close), reject for brand-new candidates.
            None => data.is_position,
        };

        if !passes_liquidity_gate {
            debug!(symbol, "dropped by liquidity gate");
            continue;
        }

        signal_data_map.insert(symbol, features);
    }

    state.alerts = signal_data_map
        .iter()
        .flat_map(|(symbol, features)| derive_alerts(symbol, features))
        .collect();
    state.signal_data_map = signal_data_map;

    state.performance = performance::summarize(repo, trader_id).await;

    Ok(())
}

fn derive_alerts(symbol: &str, f: &MarketFeatures) -> Vec<Alert> {
    let mut alerts = Vec::new();

    let abs_1h = f.price_change_1h.abs();
    if abs_1h > 10.0 {
        alerts.push(Alert {
            symbol: symbol.to_string(),
            severity: "high",
            kind: "price_move_1h",
            message: format!("{symbol} moved {:.2}% over the last hour", f.price_change_1h),
        });
    } else if abs_1h > 5.0 {
        alerts.push(Alert {
            symbol: symbol.to_string(),
            severity: "medium",
            kind: "price_move_1h",
            message: format!("{symbol} moved {:.2}% over the last hour", f.price_change_1h),
        });
    }

    if f.price_change_4h.abs() > 10.0 {
        alerts.push(Alert {
            symbol: symbol.to_string(),
            severity: "medium",
            kind: "price_move_4h",
            message: format!("{symbol} moved {:.2}% over the last 4h bar", f.price_change_4h),
        });
    }

    if f.average_volume_4h > 0.0 && f.current_volume_4h / f.average_volume_4h > 2.0 {
        alerts.push(Alert {
            symbol: symbol.to_string(),
            severity: "medium",
            kind: "volume_spike",
            message: format!(
                "{symbol} 4h volume is {:.1}x its average",
                f.current_volume_4h / f.average_volume_4h
            ),
        });
    }

    if let Some(rsi) = f.long_tf.rsi14 {
        if rsi > 80.0 {
            alerts.push(Alert {
                symbol: symbol.to_string(),
                severity: "medium",
                kind: "overbought",
                message: format!("{symbol} 4h RSI14 at {rsi:.1}"),
            });
        } else if rsi < 20.0 {
            alerts.push(Alert {
                symbol: symbol.to_string(),
                severity: "medium",
                kind: "oversold",
                message: format!("{symbol} 4h RSI14 at {rsi:.1}"),
            });
        }
    }

    if let (Some(short_macd), Some(long_macd)) = (f.short_tf.macd, f.long_tf.macd) {
        if short_macd != 0.0 && long_macd != 0.0 && (short_macd > 0.0) != (long_macd > 0.0) {
            alerts.push(Alert {
                symbol: symbol.to_string(),
                severity: "low",
                kind: "macd_divergence",
                message: format!("{symbol} short- and long-timeframe MACD disagree in sign"),
            });
        }
    }

    if let (Some(oi), Some(oi_average)) = (f.open_interest, f.oi_average) {
        if oi_average > 0.0 && oi / oi_average < 0.95 {
            alerts.push(Alert {
                symbol: symbol.to_string(),
                severity: "medium",
                kind: "liquidity_risk",
                message: format!(
                    "{symbol} open interest at {:.1}% of its rolling placeholder average",
                    oi / oi_average * 100.0
                ),
            });
        }
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_engine::TimeframeFeatures;

    fn tf(macd: Option<f64>, rsi14: Option<f64>) -> TimeframeFeatures {
        TimeframeFeatures { ema20: None, ema50: None, macd, rsi7: None, rsi14, atr14: None, atr3: None }
    }

    fn features(price_change_1h: f64, price_change_4h: f64) -> MarketFeatures {
        MarketFeatures {
            symbol: "BTC/USDT".into(),
            current_price: 100.0,
            price_change_1h,
            price_change_4h,
            short_tf: tf(Some(1.0), None),
            long_tf: tf(Some(1.0), Some(50.0)),
            current_volume_4h: 0.0,
            average_volume_4h: 0.0,
            open_interest: None,
            oi_average: None,
            funding_rate: None,
            intraday_series: None,
            longer_term_series: None,
        }
    }

    #[test]
    fn large_1h_move_is_high_severity() {
        let f = features(12.0, 0.0);
        let alerts = derive_alerts("BTC/USDT", &f);
        assert!(alerts.iter().any(|a| a.kind == "price_move_1h" && a.severity == "high"));
    }

    #[test]
    fn moderate_1h_move_is_medium_severity() {
        let f = features(-6.0, 0.0);
        let alerts = derive_alerts("BTC/USDT", &f);
        assert!(alerts.iter().any(|a| a.kind == "price_move_1h" && a.severity == "medium"));
    }

    #[test]
    fn macd_divergence_detected_on_opposite_signs() {
        let mut f = features(0.0, 0.0);
        f.short_tf.macd = Some(1.0);
        f.long_tf.macd = Some(-1.0);
        let alerts = derive_alerts("BTC/USDT", &f);
        assert!(alerts.iter().any(|a| a.kind == "macd_divergence"));
    }

    #[test]
    fn liquidity_risk_flagged_below_95_percent_of_placeholder_average() {
        let mut f = features(0.0, 0.0);
        f.open_interest = Some(90.0);
        f.oi_average = Some(100.0);
        let alerts = derive_alerts("BTC/USDT", &f);
        assert!(alerts.iter().any(|a| a.kind == "liquidity_risk"));
    }

    #[test]
    fn quiet_symbol_raises_no_alerts() {
        let f = features(1.0, 1.0);
        assert!(derive_alerts("BTC/USDT", &f).is_empty());
    }
}
