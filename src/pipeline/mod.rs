// =============================================================================
// DecisionPipeline — the fixed six-stage scan driver
// =============================================================================
//
// A tagged-union-of-nodes-with-a-linear-driver port of
// `original_source/decision_engine/graph_builder.py`'s LangGraph wiring:
// there are no branches or loops, so the graph collapses to a straight-line
// sequence of `&mut PipelineState` mutations. Each stage degrades
// internally on transient failures (§7); a stage returning `Err` here means
// something unexpected happened and the whole scan is abandoned, matching
// `TraderWorker`'s "log and wait 60s" policy at the call site.
// =============================================================================

pub mod ai_decision;
pub mod coin_pool;
pub mod data_collector;
pub mod executor;
pub mod risk_validator;
pub mod signal_analyzer;
pub mod state;

use std::sync::Arc;

use uuid::Uuid;

use crate::config::TraderConfig;
use crate::exchange::ExchangeAdapter;
use crate::llm::LlmClient;
use crate::market_data::MarketFeed;
use crate::store::StoreRepository;
use crate::symbol_filter::SymbolFilter;

pub use state::PipelineState;

/// Everything one scan needs beyond the per-trader config: the
/// long-lived collaborators a `TraderWorker` owns for its whole lifetime.
pub struct DecisionPipeline {
    pub trader_id: Uuid,
    pub feed: Arc<MarketFeed>,
    pub symbol_filter: Option<Arc<SymbolFilter>>,
    pub adapter: Arc<dyn ExchangeAdapter>,
    pub llm: Arc<dyn LlmClient>,
    pub store: StoreRepository,
    pub http: reqwest::Client,
}

impl DecisionPipeline {
    /// Execute one full scan: `CoinPool -> DataCollector -> SignalAnalyzer ->
    /// AIDecision -> RiskValidator -> Executor`, in that fixed order, over a
    /// freshly constructed [`PipelineState`].
    pub async fn run_once(
        &self,
        trader_config: TraderConfig,
        runtime_minutes: f64,
        call_count: u64,
    ) -> anyhow::Result<PipelineState> {
        let mut state = PipelineState::new(trader_config, runtime_minutes, call_count);

        coin_pool::run(&mut state, &self.http, self.symbol_filter.as_deref()).await?;
        data_collector::run(&mut state, self.adapter.as_ref(), &self.feed).await?;
        signal_analyzer::run(&mut state, self.adapter.as_ref(), &self.store, self.trader_id).await?;
        ai_decision::run(&mut state, self.llm.as_ref()).await?;
        risk_validator::run(&mut state, &self.store, self.trader_id).await?;
        executor::run(&mut state, self.adapter.as_ref()).await?;

        Ok(state)
    }
}
