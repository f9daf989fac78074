// =============================================================================
// Store — Postgres-backed persistence gateway
// =============================================================================

mod connection;
mod error;
mod models;
mod repository;

pub use connection::{connect, connection_string, run_migrations};
pub use error::StoreError;
pub use models::{
    AiModelRow, DecisionLogRow, ExchangeRow, PromptTemplateRow, SignalSourceRow,
    SystemConfigRow, TradeRecordRow, TraderRow, UserRow,
};
pub use repository::StoreRepository;
