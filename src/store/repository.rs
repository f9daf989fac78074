// =============================================================================
// Store repository — async queries against the nine persisted tables
// =============================================================================
//
// Shaped after `AllanBico-zenith/crates/database/src/repository.rs`'s
// `DbRepository`. That teacher mixes compile-time-checked `query!`/`query_as!`
// macros with the plain runtime `sqlx::query`/`query_as` functions; this
// repository uses only the runtime-checked form throughout, since there is no
// live database available to satisfy the macros' compile-time verification.
// =============================================================================

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::error::StoreError;
use super::models::{
    AiModelRow, DecisionLogRow, ExchangeRow, PromptTemplateRow, SignalSourceRow,
    TradeRecordRow, TraderRow,
};
use crate::types::DecisionLogRecord;

#[derive(Clone)]
pub struct StoreRepository {
    pool: PgPool,
}

impl StoreRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_enabled_traders(&self) -> Result<Vec<TraderRow>, StoreError> {
        let rows = sqlx::query_as::<_, TraderRow>(
            "SELECT id, user_id, name, scan_interval_minutes, ai_model_id, exchange_id, \
             signal_source_id, prompt_template_id, btc_eth_leverage, altcoin_leverage, \
             trading_coins, enabled, is_running \
             FROM traders WHERE enabled = true",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn get_trader(&self, trader_id: Uuid) -> Result<TraderRow, StoreError> {
        sqlx::query_as::<_, TraderRow>(
            "SELECT id, user_id, name, scan_interval_minutes, ai_model_id, exchange_id, \
             signal_source_id, prompt_template_id, btc_eth_leverage, altcoin_leverage, \
             trading_coins, enabled, is_running \
             FROM traders WHERE id = $1",
        )
        .bind(trader_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    pub async fn get_ai_model(&self, id: Uuid) -> Result<AiModelRow, StoreError> {
        sqlx::query_as::<_, AiModelRow>(
            "SELECT id, provider, base_url, api_key, model_name, enabled \
             FROM ai_models WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    pub async fn get_exchange(&self, id: Uuid) -> Result<ExchangeRow, StoreError> {
        sqlx::query_as::<_, ExchangeRow>(
            "SELECT id, name, api_key, secret_key, testnet FROM exchanges WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    pub async fn get_signal_source(
        &self,
        id: Uuid,
    ) -> Result<Option<SignalSourceRow>, StoreError> {
        let row = sqlx::query_as::<_, SignalSourceRow>(
            "SELECT id, use_coin_pool, coin_pool_url, use_oi_top, oi_top_url, use_inside_coins \
             FROM user_signal_sources WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_prompt_template(
        &self,
        id: Uuid,
    ) -> Result<Option<PromptTemplateRow>, StoreError> {
        let row = sqlx::query_as::<_, PromptTemplateRow>(
            "SELECT id, name, content FROM prompt_templates WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Reads a single key from `system_config`, falling back to `default` when
    /// absent (mirrors `trader_manager.py::_get_system_config`'s per-key defaults).
    pub async fn get_system_config(&self, key: &str, default: &str) -> Result<String, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM system_config WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(value,)| value).unwrap_or_else(|| default.to_string()))
    }

    pub async fn set_trader_running(&self, trader_id: Uuid, running: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE traders SET is_running = $1 WHERE id = $2")
            .bind(running)
            .bind(trader_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Trade records for `trader_id` filled within the last `hours`, newest first.
    pub async fn recent_trade_records(
        &self,
        trader_id: Uuid,
        hours: i64,
    ) -> Result<Vec<TradeRecordRow>, StoreError> {
        let since = Utc::now() - chrono::Duration::hours(hours);

        let rows = sqlx::query_as::<_, TradeRecordRow>(
            "SELECT id, trader_id, symbol, side, quantity, price, pnl, filled_at \
             FROM trade_records WHERE trader_id = $1 AND filled_at >= $2 \
             ORDER BY filled_at DESC",
        )
        .bind(trader_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn insert_decision_log(&self, record: &DecisionLogRecord) -> Result<(), StoreError> {
        let confidence: Decimal = record.confidence;

        sqlx::query(
            "INSERT INTO decision_logs \
             (trader_id, symbol, state_snapshot, decision_result, reasoning, confidence, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.trader_id)
        .bind(&record.symbol)
        .bind(&record.state_snapshot)
        .bind(&record.decision_result)
        .bind(&record.reasoning)
        .bind(confidence)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn recent_decision_logs(
        &self,
        trader_id: Uuid,
        limit: i64,
    ) -> Result<Vec<DecisionLogRow>, StoreError> {
        let rows = sqlx::query_as::<_, DecisionLogRow>(
            "SELECT id, trader_id, symbol, state_snapshot, decision_result, reasoning, \
             confidence, created_at FROM decision_logs WHERE trader_id = $1 \
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(trader_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
