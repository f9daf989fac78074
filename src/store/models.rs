// =============================================================================
// Store row models
// =============================================================================
//
// One struct per table the core reads or writes (§6's "Persisted state
// layout"). Field sets follow the spec's table list plus the original
// system's model fields (`trader_manager.py`, `Risk_check.py`'s
// `_save_validated_decision_logs` snapshot shape).
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct AiModelRow {
    pub id: Uuid,
    pub provider: String,
    pub base_url: String,
    pub api_key: String,
    pub model_name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct ExchangeRow {
    pub id: Uuid,
    pub name: String,
    pub api_key: String,
    pub secret_key: String,
    pub testnet: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct SignalSourceRow {
    pub id: Uuid,
    pub use_coin_pool: bool,
    pub coin_pool_url: Option<String>,
    pub use_oi_top: bool,
    pub oi_top_url: Option<String>,
    pub use_inside_coins: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct PromptTemplateRow {
    pub id: Uuid,
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct TraderRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub scan_interval_minutes: i32,
    pub ai_model_id: Uuid,
    pub exchange_id: Uuid,
    pub signal_source_id: Option<Uuid>,
    pub prompt_template_id: Option<Uuid>,
    pub btc_eth_leverage: i32,
    pub altcoin_leverage: i32,
    pub trading_coins: Option<String>,
    pub enabled: bool,
    pub is_running: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct TradeRecordRow {
    pub id: Uuid,
    pub trader_id: Uuid,
    pub symbol: String,
    pub side: String,
    pub quantity: f64,
    pub price: f64,
    pub pnl: Option<f64>,
    pub filled_at: DateTime<Utc>,
}

/// One `decision_logs` row as persisted (mirrors [`crate::types::DecisionLogRecord`]).
#[derive(Debug, Clone, FromRow)]
pub struct DecisionLogRow {
    pub id: Uuid,
    pub trader_id: Uuid,
    pub symbol: String,
    pub state_snapshot: JsonValue,
    pub decision_result: String,
    pub reasoning: String,
    pub confidence: Decimal,
    pub created_at: DateTime<Utc>,
}

/// A `system_config` key/value row.
#[derive(Debug, Clone, FromRow)]
pub struct SystemConfigRow {
    pub key: String,
    pub value: String,
}
