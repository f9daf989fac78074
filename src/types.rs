// =============================================================================
// Shared types used across the fleet-trader engine
// =============================================================================

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A trading action a `Decision` may request.
///
/// This is the exhaustive six-member action set the core understands; the
/// AI collaborator is never allowed to emit anything outside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
    Hold,
    Wait,
}

impl Action {
    pub fn is_open(self) -> bool {
        matches!(self, Action::OpenLong | Action::OpenShort)
    }

    pub fn is_close(self) -> bool {
        matches!(self, Action::CloseLong | Action::CloseShort)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::OpenLong => "open_long",
            Action::OpenShort => "open_short",
            Action::CloseLong => "close_long",
            Action::CloseShort => "close_short",
            Action::Hold => "hold",
            Action::Wait => "wait",
        };
        write!(f, "{s}")
    }
}

/// Long or short side of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Balance snapshot for a single asset from the exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}

/// An open position as reported by the exchange adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    #[serde(default)]
    pub unrealized_pnl: f64,
}

/// A candidate or AI-issued trading decision.
///
/// Created by the AIDecision pipeline stage, mutated only by the
/// RiskValidator (which may drop it but never edits its fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub symbol: String,
    pub action: Action,
    #[serde(default)]
    pub leverage: Option<u32>,
    #[serde(default)]
    pub position_size_usd: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub risk_usd: Option<f64>,
    /// Confidence on a 0-100 scale as produced by the LLM collaborator.
    pub confidence: u32,
    pub reasoning: String,
}

/// One `decision_logs` row: a validated decision plus a trimmed snapshot of
/// the pipeline state that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionLogRecord {
    pub trader_id: uuid::Uuid,
    pub symbol: String,
    pub state_snapshot: serde_json::Value,
    pub decision_result: String,
    pub reasoning: String,
    /// Normalized to [0, 1]; values supplied on a 0-100 scale are divided by
    /// 100 before being stored here.
    pub confidence: Decimal,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Outcome of handing one approved decision to the exchange adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub symbol: String,
    pub action: Action,
    pub status: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_display_matches_wire_format() {
        assert_eq!(Action::OpenLong.to_string(), "open_long");
        assert_eq!(Action::Wait.to_string(), "wait");
    }

    #[test]
    fn action_is_open_and_close() {
        assert!(Action::OpenShort.is_open());
        assert!(!Action::OpenShort.is_close());
        assert!(Action::CloseLong.is_close());
        assert!(!Action::Hold.is_open() && !Action::Hold.is_close());
    }
}
