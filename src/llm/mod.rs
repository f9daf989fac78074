// =============================================================================
// LLM collaborator interface
// =============================================================================
//
// The decision pipeline's AiDecision stage delegates the actual trading
// judgment to an external LLM. The core depends only on this trait; the
// workspace ships one concrete implementation (`http_client::HttpLlmClient`,
// an OpenAI-chat-completions-compatible client) grounded on the teacher's
// `binance::client::BinanceClient` HTTP idiom.
//
// Structured-output parsing is not relied upon — the wire contract is a
// plain JSON object in the response text, optionally fenced in a ```json
// code block, following the original system's AIDecision node.
// =============================================================================

pub mod http_client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http_client::HttpLlmClient;

/// One trading decision as returned by the LLM, prior to validation.
///
/// Field names and optionality mirror the original system's `DecisionItem`
/// schema exactly, since that's the shape the LLM is prompted to emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDecision {
    pub symbol: String,
    pub action: String,
    #[serde(default)]
    pub leverage: Option<u32>,
    #[serde(default)]
    pub position_size_usd: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    pub confidence: u32,
    #[serde(default)]
    pub risk_usd: Option<f64>,
    #[serde(default)]
    pub reasoning: String,
}

/// Outcome of one LLM call: either a parsed decision list, or the raw text
/// plus a description of why parsing failed — never a propagated error, so
/// the pipeline can log the failure and fall through to `wait` for every
/// candidate symbol.
#[derive(Debug, Clone)]
pub enum LlmOutcome {
    Decisions(Vec<RawDecision>),
    Failed { error: String, raw_response: String },
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send `system_prompt` + `user_prompt` to the model and parse its
    /// response into a decision list. Network/parse failures are captured
    /// in [`LlmOutcome::Failed`] rather than returned as an `Err`.
    async fn decide(&self, system_prompt: &str, user_prompt: &str) -> LlmOutcome;
}

/// Strip a leading/trailing ```json or ``` fence, if present, and trim
/// surrounding whitespace. Mirrors the original system's fallback parser.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim().strip_suffix("```").unwrap_or(rest).trim()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim().strip_suffix("```").unwrap_or(rest).trim()
    } else {
        trimmed
    }
}

/// Parse a model response into a decision list, accepting either a bare
/// array or an object with a `decisions` key (the shape both the
/// structured-output and JSON-fallback paths of the original system used).
pub fn parse_decisions(text: &str) -> Result<Vec<RawDecision>, serde_json::Error> {
    let cleaned = strip_code_fence(text);

    #[derive(Deserialize)]
    struct Wrapped {
        decisions: Vec<RawDecision>,
    }

    match serde_json::from_str::<Vec<RawDecision>>(cleaned) {
        Ok(decisions) => Ok(decisions),
        Err(array_err) => serde_json::from_str::<Wrapped>(cleaned)
            .map(|w| w.decisions)
            .map_err(|_| array_err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_code_fence_removes_json_fence() {
        let input = "```json\n[{\"a\":1}]\n```";
        assert_eq!(strip_code_fence(input), "[{\"a\":1}]");
    }

    #[test]
    fn strip_code_fence_passes_through_plain_text() {
        assert_eq!(strip_code_fence("[1,2,3]"), "[1,2,3]");
    }

    #[test]
    fn parse_decisions_accepts_bare_array() {
        let text = r#"[{"symbol":"BTC/USDT","action":"wait","confidence":50}]"#;
        let decisions = parse_decisions(text).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].symbol, "BTC/USDT");
    }

    #[test]
    fn parse_decisions_accepts_wrapped_object() {
        let text = r#"{"decisions":[{"symbol":"ETH/USDT","action":"hold","confidence":60}]}"#;
        let decisions = parse_decisions(text).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].action, "hold");
    }

    #[test]
    fn parse_decisions_unwraps_fenced_wrapped_object() {
        let text = "```json\n{\"decisions\":[{\"symbol\":\"BTC/USDT\",\"action\":\"wait\",\"confidence\":10}]}\n```";
        let decisions = parse_decisions(text).unwrap();
        assert_eq!(decisions.len(), 1);
    }

    #[test]
    fn parse_decisions_rejects_garbage() {
        assert!(parse_decisions("not json at all").is_err());
    }
}
