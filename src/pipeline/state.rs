// =============================================================================
// PipelineState — the single owned value threaded through one scan
// =============================================================================
//
// A closed record type, not an open map: every field named in
// `original_source/decision_engine/state.py`'s `DecisionState` TypedDict has
// an explicit, typed home here. Constructed fresh per scan by
// `TraderWorker`; never shared across scans or between traders.
// =============================================================================

use std::collections::HashMap;

use crate::config::TraderConfig;
use crate::feature_engine::MarketFeatures;
use crate::llm::RawDecision;
use crate::market_data::Kline;
use crate::performance::PerformanceSummary;
use crate::types::{Decision, ExecutionResult, Position};

/// Per-symbol account posture, assembled in `DataCollector` from the
/// exchange adapter's free-balance and open-position reads. The adapter
/// trait exposes only a per-asset free balance, not a full margin report, so
/// `margin_used_pct` here is derived from open notional against that balance
/// rather than read verbatim from the exchange (DESIGN.md Open Question 7).
#[derive(Debug, Clone, Default)]
pub struct AccountBalance {
    pub equity: f64,
    pub available: f64,
    pub margin_used_pct: f64,
}

/// One `oi_top` feed entry, carried alongside the plain candidate symbol so
/// `AIDecision` can render the original's OI-top block in the prompt.
#[derive(Debug, Clone, Default)]
pub struct OiTopEntry {
    pub oi_change: f64,
    pub oi_change_percent: f64,
    pub time_range: String,
}

/// One symbol's raw market data as collected by `DataCollector`, prior to
/// feature computation.
#[derive(Debug, Clone)]
pub struct SymbolMarketData {
    pub klines_short: Vec<Kline>,
    pub klines_long: Vec<Kline>,
    pub current_price: f64,
    /// `"stream_cache"` if the symbol is monitored by MarketFeed, else `"rest"`.
    pub source: String,
    pub is_position: bool,
    pub is_candidate: bool,
    pub error: Option<String>,
}

/// One alert derived by `SignalAnalyzer` for a symbol's computed features.
#[derive(Debug, Clone)]
pub struct Alert {
    pub symbol: String,
    pub severity: &'static str,
    pub kind: &'static str,
    pub message: String,
}

/// The LLM collaborator's raw output for this scan, prior to risk
/// validation.
#[derive(Debug, Clone, Default)]
pub struct AiDecisionOutcome {
    pub decisions: Vec<RawDecision>,
    pub errors: Vec<String>,
    pub raw: String,
}

/// The complete state of one DecisionPipeline scan. Every node receives
/// `&mut PipelineState` and mutates only the fields its stage owns; nothing
/// here is read before the stage that populates it has run.
pub struct PipelineState {
    pub trader_config: TraderConfig,

    pub candidate_symbols: Vec<String>,
    pub coin_sources: HashMap<String, Vec<String>>,
    pub oi_top_data_map: HashMap<String, OiTopEntry>,

    pub account_balance: AccountBalance,
    pub positions: Vec<Position>,

    pub market_data_map: HashMap<String, SymbolMarketData>,
    pub signal_data_map: HashMap<String, MarketFeatures>,

    pub performance: PerformanceSummary,
    pub alerts: Vec<Alert>,

    pub ai_decision: AiDecisionOutcome,
    /// Decisions that survived `RiskValidator`, in the order they were
    /// validated. Empty until `risk_validator::run` has executed.
    pub approved: Vec<Decision>,
    pub risk_approved: bool,
    pub validation_errors: Vec<String>,
    pub execution_results: Vec<ExecutionResult>,

    pub runtime_minutes: f64,
    pub call_count: u64,
}

impl PipelineState {
    /// Constructs a fresh, empty state for one scan. `runtime_minutes` and
    /// `call_count` are threaded in from the owning `TraderWorker`, which
    /// tracks them across scans (the state itself never outlives one scan).
    pub fn new(trader_config: TraderConfig, runtime_minutes: f64, call_count: u64) -> Self {
        Self {
            trader_config,
            candidate_symbols: Vec::new(),
            coin_sources: HashMap::new(),
            oi_top_data_map: HashMap::new(),
            account_balance: AccountBalance::default(),
            positions: Vec::new(),
            market_data_map: HashMap::new(),
            signal_data_map: HashMap::new(),
            performance: PerformanceSummary::default(),
            alerts: Vec::new(),
            ai_decision: AiDecisionOutcome::default(),
            approved: Vec::new(),
            risk_approved: false,
            validation_errors: Vec::new(),
            execution_results: Vec::new(),
            runtime_minutes,
            call_count,
        }
    }
}
