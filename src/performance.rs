// =============================================================================
// Performance — Sharpe-like ratio and win-rate summary
// =============================================================================
//
// Grounded on `original_source/services/market/performance.py`'s
// `PerformanceAnalyzer`. The original buckets trade PnL into fixed-width
// time periods and derives a Sharpe-like ratio from the mean/stdev of
// non-zero buckets; this mirrors that bucketing exactly rather than
// introducing a different statistic.
// =============================================================================

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::store::{StoreError, StoreRepository, TradeRecordRow};

const LOOKBACK_PERIODS: i64 = 20;
const PERIOD_MINUTES: i64 = 3;
const SUMMARY_WINDOW_HOURS: i64 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSummary {
    pub sharpe_ratio: Option<f64>,
    pub win_rate: f64,
    pub total_trades: u32,
    pub avg_return: f64,
    pub total_pnl: f64,
}

impl Default for PerformanceSummary {
    fn default() -> Self {
        Self {
            sharpe_ratio: None,
            win_rate: 0.0,
            total_trades: 0,
            avg_return: 0.0,
            total_pnl: 0.0,
        }
    }
}

/// Builds a [`PerformanceSummary`] for `trader_id` from recent fill history.
/// Any store error degrades to the all-default summary rather than propagating.
pub async fn summarize(repo: &StoreRepository, trader_id: Uuid) -> PerformanceSummary {
    let sharpe_ratio = calculate_sharpe_ratio(repo, trader_id).await.unwrap_or(None);

    let records = match repo.recent_trade_records(trader_id, SUMMARY_WINDOW_HOURS).await {
        Ok(rows) => rows,
        Err(_) => {
            return PerformanceSummary { sharpe_ratio, ..Default::default() };
        }
    };

    let total_trades = records.len() as u32;
    if total_trades == 0 {
        return PerformanceSummary { sharpe_ratio, ..Default::default() };
    }

    let mut win_count = 0u32;
    let mut total_pnl = 0.0f64;

    for record in &records {
        let trade_value = record.quantity * record.price;
        if record.side.eq_ignore_ascii_case("sell") {
            win_count += 1;
            total_pnl += trade_value;
        } else {
            total_pnl -= trade_value;
        }
    }

    let win_rate = (win_count as f64 / total_trades as f64) * 100.0;
    let avg_return = total_pnl / total_trades as f64;

    PerformanceSummary { sharpe_ratio, win_rate, total_trades, avg_return, total_pnl }
}

async fn calculate_sharpe_ratio(
    repo: &StoreRepository,
    trader_id: Uuid,
) -> Result<Option<f64>, StoreError> {
    let window_hours = (LOOKBACK_PERIODS * PERIOD_MINUTES + 59) / 60;
    let records = repo.recent_trade_records(trader_id, window_hours.max(1)).await?;

    if records.len() < 2 {
        return Ok(None);
    }

    let start_time = Utc::now() - chrono::Duration::minutes(LOOKBACK_PERIODS * PERIOD_MINUTES);
    let period_returns = bucket_period_returns(&records, start_time, PERIOD_MINUTES);

    let valid: Vec<f64> = period_returns.into_iter().filter(|&v| v != 0.0).collect();
    if valid.len() < 2 {
        return Ok(None);
    }

    let mean = valid.iter().sum::<f64>() / valid.len() as f64;
    let variance =
        valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (valid.len() - 1) as f64;
    let stdev = variance.sqrt();

    if stdev == 0.0 {
        return Ok(None);
    }

    Ok(Some(mean / stdev))
}

/// Groups chronologically-ordered fills into fixed-width minute buckets and
/// sums each bucket's signed trade value (buy negative, sell positive).
fn bucket_period_returns(
    records: &[TradeRecordRow],
    start_time: DateTime<Utc>,
    period_minutes: i64,
) -> Vec<f64> {
    let mut ascending: Vec<&TradeRecordRow> = records.iter().collect();
    ascending.sort_by_key(|r| r.filled_at);

    let mut period_returns = Vec::new();
    let mut current_period_pnl = 0.0f64;
    let mut current_period_num: Option<i64> = None;

    for record in ascending {
        let minutes_diff = (record.filled_at - start_time).num_seconds() as f64 / 60.0;
        let period_num = (minutes_diff / period_minutes as f64).floor() as i64;

        match current_period_num {
            None => current_period_num = Some(period_num),
            Some(n) if n != period_num => {
                period_returns.push(current_period_pnl);
                current_period_pnl = 0.0;
                current_period_num = Some(period_num);
            }
            Some(_) => {}
        }

        let trade_value = record.quantity * record.price;
        if record.side.eq_ignore_ascii_case("buy") {
            current_period_pnl -= trade_value;
        } else {
            current_period_pnl += trade_value;
        }
    }

    if current_period_num.is_some() {
        period_returns.push(current_period_pnl);
    }

    period_returns
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn row(symbol: &str, side: &str, qty: f64, price: f64, minutes_ago: i64) -> TradeRecordRow {
        TradeRecordRow {
            id: Uuid::new_v4(),
            trader_id: Uuid::new_v4(),
            symbol: symbol.into(),
            side: side.into(),
            quantity: qty,
            price,
            pnl: None,
            filled_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn bucket_period_returns_separates_distinct_periods() {
        let start = Utc::now() - Duration::minutes(60);
        let records = vec![
            row("BTC/USDT", "sell", 1.0, 100.0, 58),
            row("BTC/USDT", "buy", 1.0, 50.0, 50),
        ];
        let buckets = bucket_period_returns(&records, start, 3);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0], 100.0);
        assert_eq!(buckets[1], -50.0);
    }

    #[test]
    fn bucket_period_returns_merges_same_period_trades() {
        let start = Utc::now() - Duration::minutes(60);
        let records = vec![
            row("BTC/USDT", "sell", 1.0, 100.0, 59),
            row("BTC/USDT", "sell", 1.0, 20.0, 59),
        ];
        let buckets = bucket_period_returns(&records, start, 3);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0], 120.0);
    }
}
