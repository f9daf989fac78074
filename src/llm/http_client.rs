// =============================================================================
// HttpLlmClient — OpenAI-chat-completions-compatible LLM client
// =============================================================================
//
// SECURITY: the API key is sent only as a Bearer header, never logged.
//
// Grounded on the teacher's `binance::client::BinanceClient` request idiom
// (reqwest::Client + default headers + #[instrument] spans); the relaxed
// parse-with-fallback behavior is grounded on the original system's
// AIDecision.run(), which falls back to manual JSON extraction (including
// stripping a ```json fence) when structured output isn't available.
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument, warn};

use super::{parse_decisions, LlmClient, LlmOutcome};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// An OpenAI-compatible chat-completions client (also fronts compatible
/// providers that speak the same wire format, e.g. self-hosted gateways).
pub struct HttpLlmClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, api_key: &str, model: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
            headers.insert(AUTHORIZATION, val);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("failed to build reqwest client for HttpLlmClient");

        Self {
            base_url: base_url.into(),
            model: model.into(),
            client,
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    #[instrument(skip(self, system_prompt, user_prompt), name = "llm::decide")]
    async fn decide(&self, system_prompt: &str, user_prompt: &str) -> LlmOutcome {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: system_prompt },
                ChatMessage { role: "user", content: user_prompt },
            ],
            temperature: 0.2,
        };

        let url = format!("{}/chat/completions", self.base_url);

        let resp = match self.client.post(&url).json(&body).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "LLM request failed");
                return LlmOutcome::Failed {
                    error: e.to_string(),
                    raw_response: String::new(),
                };
            }
        };

        let status = resp.status();
        let raw_text = match resp.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to read LLM response body");
                return LlmOutcome::Failed {
                    error: e.to_string(),
                    raw_response: String::new(),
                };
            }
        };

        if !status.is_success() {
            warn!(%status, body = %raw_text, "LLM endpoint returned an error status");
            return LlmOutcome::Failed {
                error: format!("LLM endpoint returned {status}"),
                raw_response: raw_text,
            };
        }

        let parsed: Result<ChatResponse, _> = serde_json::from_str(&raw_text);
        let content = match parsed {
            Ok(chat) => match chat.choices.into_iter().next() {
                Some(choice) => choice.message.content,
                None => {
                    warn!("LLM response had no choices");
                    return LlmOutcome::Failed {
                        error: "LLM response had no choices".to_string(),
                        raw_response: raw_text,
                    };
                }
            },
            Err(e) => {
                warn!(error = %e, "failed to parse chat-completions envelope");
                return LlmOutcome::Failed {
                    error: format!("failed to parse chat-completions envelope: {e}"),
                    raw_response: raw_text,
                };
            }
        };

        match parse_decisions(&content) {
            Ok(decisions) => {
                debug!(count = decisions.len(), "LLM decisions parsed");
                LlmOutcome::Decisions(decisions)
            }
            Err(e) => {
                warn!(error = %e, "failed to parse decision content as JSON");
                LlmOutcome::Failed {
                    error: format!("JSON parse failed: {e}"),
                    raw_response: content,
                }
            }
        }
    }
}

impl std::fmt::Debug for HttpLlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLlmClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::super::parse_decisions;

    #[test]
    fn embedded_chat_content_parses_as_decisions() {
        let content = r#"[{"symbol":"BTC/USDT","action":"wait","confidence":40,"reasoning":"no edge"}]"#;
        let decisions = parse_decisions(content).unwrap();
        assert_eq!(decisions[0].symbol, "BTC/USDT");
        assert_eq!(decisions[0].reasoning, "no edge");
    }
}
