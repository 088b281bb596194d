//! Language model abstraction and the Groq chat completions client.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::{RelayError, Result};
use crate::message::{Message, Role, ToolCall};
use crate::tool::ToolDescriptor;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const GROQ_PROVIDER: &str = "groq";

/// Result of a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// Minimal abstraction around a chat completion provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ModelCompletion>;
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> RelayError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return RelayError::LanguageModel(format!("{provider} rate limit exceeded: {body}"));
    }
    RelayError::LanguageModel(format!("{provider} request failed with {status}: {body}"))
}

/// Reasoning models wrap their scratchpad in `<think>` tags; only the answer is kept.
pub(crate) fn strip_reasoning(content: &str) -> String {
    let mut rest = content;
    let mut answer = String::new();
    while let Some(start) = rest.find("<think>") {
        answer.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    answer.push_str(rest);
    answer.trim().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Groq Client (OpenAI-compatible API)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct GroqClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
}

impl GroqClient {
    /// Fails with a configuration error when the provider is not Groq or no
    /// API key is configured.
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        if !cfg.provider.eq_ignore_ascii_case(GROQ_PROVIDER) {
            return Err(RelayError::Configuration(format!(
                "unsupported model provider `{}`; only `{GROQ_PROVIDER}` is available",
                cfg.provider
            )));
        }
        let api_key = cfg.api_key()?.to_string();
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout())
            .build()
            .map_err(|err| RelayError::Configuration(format!("http client error: {err}")))?;
        Ok(Self {
            http,
            model: cfg.model.clone(),
            api_key,
            base_url: cfg
                .base_url
                .clone()
                .unwrap_or_else(|| GROQ_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn to_messages(messages: &[Message]) -> Vec<ChatMessage> {
        messages
            .iter()
            .map(|message| {
                let role = match message.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                };
                let tool_calls = if message.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        message
                            .tool_calls
                            .iter()
                            .map(|call| ChatToolCall {
                                id: call.id.clone(),
                                r#type: "function".to_string(),
                                function: ChatFunctionCall {
                                    name: call.name.clone(),
                                    arguments: call.arguments.to_string(),
                                },
                            })
                            .collect(),
                    )
                };
                let content = if message.role == Role::Assistant
                    && tool_calls.is_some()
                    && message.content.is_empty()
                {
                    None
                } else {
                    Some(message.content.clone())
                };
                ChatMessage {
                    role: role.to_string(),
                    content,
                    tool_call_id: message
                        .tool_result
                        .as_ref()
                        .and_then(|result| result.tool_call_id.clone()),
                    name: message.tool_result.as_ref().map(|result| result.name.clone()),
                    tool_calls,
                }
            })
            .collect()
    }

    fn to_tools(tools: &[ToolDescriptor]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema.to_json_schema(),
                    }
                })
            })
            .collect()
    }
}

#[async_trait]
impl LanguageModel for GroqClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ModelCompletion> {
        let mut body = json!({
            "model": self.model,
            "messages": Self::to_messages(messages),
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(Self::to_tools(tools));
            body["tool_choice"] = json!("auto");
        }

        debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            "requesting completion"
        );
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| RelayError::LanguageModel(format!("Groq request failed: {err}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "Groq"));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|err| RelayError::LanguageModel(format!("Groq parse error: {err}")))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::LanguageModel("Groq returned no choices".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                arguments: serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| Value::String(call.function.arguments.clone())),
                name: call.function.name,
            })
            .collect();

        Ok(ModelCompletion {
            content: choice
                .message
                .content
                .map(|content| strip_reasoning(&content)),
            tool_calls,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stub Model
// ─────────────────────────────────────────────────────────────────────────────

/// A deterministic model used for tests and demos.
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum StubDirective {
    Respond { content: String },
    CallTool { name: String, arguments: Value },
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete_chat(
        &self,
        _messages: &[Message],
        _tools: &[ToolDescriptor],
    ) -> Result<ModelCompletion> {
        let raw = self
            .responses
            .lock()
            .map_err(|_| RelayError::LanguageModel("StubModel poisoned".into()))?
            .pop_front()
            .ok_or_else(|| {
                RelayError::LanguageModel("StubModel ran out of scripted responses".into())
            })?;

        match serde_json::from_str::<StubDirective>(&raw) {
            Ok(StubDirective::Respond { content }) => Ok(ModelCompletion {
                content: Some(content),
                tool_calls: Vec::new(),
            }),
            Ok(StubDirective::CallTool { name, arguments }) => Ok(ModelCompletion {
                content: None,
                tool_calls: vec![ToolCall {
                    id: None,
                    name,
                    arguments,
                }],
            }),
            Err(_) => Ok(ModelCompletion {
                content: Some(raw),
                tool_calls: Vec::new(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default = "function_type")]
    r#type: String,
    function: ChatFunctionCall,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatToolCall>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolResult;

    #[test]
    fn strips_think_blocks() {
        assert_eq!(
            strip_reasoning("<think>12 * 8 = 96</think>\n\nThe answer is 96."),
            "The answer is 96."
        );
        assert_eq!(strip_reasoning("plain"), "plain");
        assert_eq!(strip_reasoning("a <think>unterminated"), "a");
    }

    #[test]
    fn missing_api_key_fails_construction() {
        let err = GroqClient::from_config(&ModelConfig::default()).err().unwrap();
        assert!(matches!(err, RelayError::Configuration(_)));
    }

    #[test]
    fn other_providers_are_rejected() {
        let cfg = ModelConfig {
            provider: "openai".into(),
            api_key: Some("sk-test".into()),
            ..ModelConfig::default()
        };
        let err = GroqClient::from_config(&cfg).err().unwrap();
        assert!(matches!(err, RelayError::Configuration(msg) if msg.contains("openai")));

        let cfg = ModelConfig {
            provider: "Groq".into(),
            api_key: Some("gsk-test".into()),
            ..ModelConfig::default()
        };
        assert!(GroqClient::from_config(&cfg).is_ok());
    }

    #[test]
    fn tool_round_trip_messages_are_linked_by_id() {
        let call = ToolCall {
            id: Some("call_1".into()),
            name: "get_weather".into(),
            arguments: json!({"location": "New Jersey"}),
        };
        let messages = vec![
            Message::assistant_tool_calls("", vec![call]),
            Message::tool(ToolResult {
                tool_call_id: Some("call_1".into()),
                name: "get_weather".into(),
                output: "rain".into(),
                is_error: false,
            }),
        ];
        let wire = serde_json::to_value(GroqClient::to_messages(&messages)).unwrap();
        assert_eq!(wire[0]["content"], Value::Null);
        assert_eq!(wire[0]["tool_calls"][0]["id"], "call_1");
        assert_eq!(
            wire[0]["tool_calls"][0]["function"]["arguments"],
            r#"{"location":"New Jersey"}"#
        );
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "call_1");
        assert_eq!(wire[1]["content"], "rain");
    }

    #[tokio::test]
    async fn stub_model_replays_script() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"add","arguments":{"a":1,"b":2}}"#.into(),
            "not a directive".into(),
        ]);
        let first = model.complete_chat(&[], &[]).await.unwrap();
        assert_eq!(first.tool_calls[0].name, "add");
        let second = model.complete_chat(&[], &[]).await.unwrap();
        assert_eq!(second.content.as_deref(), Some("not a directive"));
        assert!(model.complete_chat(&[], &[]).await.is_err());
    }
}
