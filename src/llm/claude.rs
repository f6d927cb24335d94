//! Anthropic Messages API implementation of [`super::LlmClient`].
//!
//! Reuses `infrastructure::claude::{rate_limiter::TokenBucketRateLimiter,
//! retry::RetryPolicy}` almost verbatim (swapping the teacher's stray
//! `eprintln!` for `tracing::warn!`), and follows
//! `infrastructure::claude::client::ClaudeClientImpl`'s request-building
//! shape, generalized to the §6 `LlmClient` trait surface and to the
//! agent loop's `Turn`/`TurnPart` history shape instead of raw
//! `MessageRequest`/`Message`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::agent::{Turn, TurnPart, TurnRole};
use crate::infrastructure::claude::error::ClaudeApiError;
use crate::infrastructure::claude::rate_limiter::TokenBucketRateLimiter;
use crate::infrastructure::claude::retry::RetryPolicy;

use super::{BufferedStream, FunctionCall, LlmClient, LlmStream};

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize)]
struct ThinkingConfig {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
    #[serde(other)]
    Other,
}

/// Turn the agent's internal history into the wire format, merging a
/// trailing tool-response turn with adjacent tool-call parts as the
/// Anthropic API expects (tool_result blocks paired with their tool_use).
fn turns_to_messages(history: &[Turn]) -> Vec<AnthropicMessage> {
    history
        .iter()
        .map(|turn| {
            let role = match turn.role {
                TurnRole::User => "user",
                TurnRole::Model => "assistant",
            };
            let content = turn
                .parts
                .iter()
                .map(|part| match part {
                    TurnPart::Text { text } => json!({"type": "text", "text": text}),
                    TurnPart::ToolCall { id, name, args } => {
                        json!({"type": "tool_use", "id": id, "name": name, "input": args})
                    }
                    TurnPart::ToolResponse { id, content, success } => json!({
                        "type": "tool_result",
                        "tool_use_id": id,
                        "content": content,
                        "is_error": !success,
                    }),
                })
                .collect::<Vec<_>>();
            AnthropicMessage {
                role: role.to_string(),
                content: serde_json::Value::Array(content),
            }
        })
        .collect()
}

/// Client configuration; mirrors `ClaudeClientConfig` in spirit but carries
/// the §6 thinking-budget/tool-surface knobs too.
#[derive(Debug, Clone)]
pub struct ClaudeClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub rate_limit_rps: f64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_secs: u64,
    pub model: String,
}

impl Default for ClaudeClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.anthropic.com".to_string(),
            rate_limit_rps: 10.0,
            max_retries: 3,
            initial_backoff_ms: 10_000,
            max_backoff_ms: 300_000,
            timeout_secs: 300,
            model: "claude-3-5-sonnet-20241022".to_string(),
        }
    }
}

/// Production client against the Anthropic Messages API.
pub struct ClaudeClient {
    http_client: HttpClient,
    config: ClaudeClientConfig,
    rate_limiter: Arc<TokenBucketRateLimiter>,
    retry_policy: RetryPolicy,
    thinking_budget: Mutex<u32>,
    tool_names: Mutex<Vec<String>>,
}

impl ClaudeClient {
    pub fn new(config: ClaudeClientConfig) -> Result<Self, String> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            rate_limiter: Arc::new(TokenBucketRateLimiter::new(config.rate_limit_rps)),
            retry_policy: RetryPolicy::new(config.max_retries, config.initial_backoff_ms, config.max_backoff_ms),
            http_client,
            config,
            thinking_budget: Mutex::new(0),
            tool_names: Mutex::new(Vec::new()),
        })
    }

    async fn send(&self, messages: Vec<AnthropicMessage>) -> Result<Box<dyn LlmStream>, String> {
        let thinking_budget = *self.thinking_budget.lock().unwrap();
        let tools = {
            let names = self.tool_names.lock().unwrap();
            if names.is_empty() {
                None
            } else {
                Some(
                    names
                        .iter()
                        .map(|name| json!({"name": name, "input_schema": {"type": "object"}}))
                        .collect(),
                )
            }
        };
        let request = AnthropicRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: 8192,
            thinking: if thinking_budget > 0 {
                Some(ThinkingConfig {
                    kind: "enabled",
                    budget_tokens: thinking_budget,
                })
            } else {
                None
            },
            tools,
        };

        let response = self
            .retry_policy
            .execute(|| async {
                self.rate_limiter
                    .acquire()
                    .await
                    .map_err(|e| anyhow::anyhow!("rate limiter error: {e}"))?;
                self.send_once(&request).await
            })
            .await
            .map_err(|e| e.to_string())?;

        let mut text = String::new();
        let mut function_calls = Vec::new();
        for block in response.content {
            match block {
                AnthropicContentBlock::Text { text: t } => text.push_str(&t),
                AnthropicContentBlock::ToolUse { id, name, input } => {
                    function_calls.push(FunctionCall { id, name, args: input });
                }
                AnthropicContentBlock::Other => {}
            }
        }
        Ok(Box::new(BufferedStream::new(text, function_calls)))
    }

    async fn send_once(&self, request: &AnthropicRequest) -> Result<AnthropicResponse, anyhow::Error> {
        let response = self
            .http_client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("transport error sending to Claude API: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error response body".to_string());
            let error = ClaudeApiError::from_status(status, body);
            if error.is_transient() {
                tracing::warn!(%status, "transient Claude API error, will retry if attempts remain");
            }
            return Err(anyhow::anyhow!(error));
        }
        response
            .json::<AnthropicResponse>()
            .await
            .map_err(|e| anyhow::anyhow!("failed to parse Claude API response: {e}"))
    }
}

#[async_trait]
impl LlmClient for ClaudeClient {
    async fn send_message(&self, prompt: &str) -> Result<Box<dyn LlmStream>, String> {
        self.send(vec![AnthropicMessage {
            role: "user".to_string(),
            content: json!(prompt),
        }])
        .await
    }

    async fn send_message_with_history(
        &self,
        history: &[Turn],
        message: &str,
    ) -> Result<Box<dyn LlmStream>, String> {
        let mut messages = turns_to_messages(history);
        messages.push(AnthropicMessage {
            role: "user".to_string(),
            content: json!(message),
        });
        self.send(messages).await
    }

    async fn send_function_response(
        &self,
        history: &[Turn],
        responses: &[TurnPart],
    ) -> Result<Box<dyn LlmStream>, String> {
        let mut messages = turns_to_messages(history);
        let content = responses
            .iter()
            .map(|part| match part {
                TurnPart::ToolResponse { id, content, success } => json!({
                    "type": "tool_result",
                    "tool_use_id": id,
                    "content": content,
                    "is_error": !success,
                }),
                other => json!(other),
            })
            .collect::<Vec<_>>();
        messages.push(AnthropicMessage {
            role: "user".to_string(),
            content: serde_json::Value::Array(content),
        });
        self.send(messages).await
    }

    fn with_model(&self, model: &str) -> Box<dyn LlmClient> {
        let mut config = self.config.clone();
        config.model = model.to_string();
        Box::new(Self {
            http_client: self.http_client.clone(),
            rate_limiter: Arc::clone(&self.rate_limiter),
            retry_policy: RetryPolicy::new(
                config.max_retries,
                config.initial_backoff_ms,
                config.max_backoff_ms,
            ),
            thinking_budget: Mutex::new(*self.thinking_budget.lock().unwrap()),
            tool_names: Mutex::new(self.tool_names.lock().unwrap().clone()),
            config,
        })
    }

    fn set_thinking_budget(&mut self, tokens: u32) {
        *self.thinking_budget.lock().unwrap() = tokens;
    }

    fn set_tools(&mut self, tool_names: Vec<String>) {
        *self.tool_names.lock().unwrap() = tool_names;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turns_to_messages_maps_roles_and_tool_parts() {
        let history = vec![
            Turn::text(TurnRole::User, "hi"),
            Turn {
                role: TurnRole::Model,
                parts: vec![TurnPart::ToolCall {
                    id: "1".into(),
                    name: "read".into(),
                    args: json!({"path": "x"}),
                }],
            },
            Turn {
                role: TurnRole::User,
                parts: vec![TurnPart::ToolResponse {
                    id: "1".into(),
                    name: "read".into(),
                    content: "contents".into(),
                    success: true,
                }],
            },
        ];
        let messages = turns_to_messages(&history);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[2].role, "user");
    }

    #[test]
    fn default_config_matches_teacher_precedent() {
        let config = ClaudeClientConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_backoff_ms, 10_000);
        assert_eq!(config.max_backoff_ms, 300_000);
    }
}
