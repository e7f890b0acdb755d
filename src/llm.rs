//! Language model abstractions and the Ollama provider.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::GenerationConfig;
use crate::error::{FlowError, Result};
use crate::message::{Message, Role, ToolCall};
use crate::registry::ToolDescriptor;

/// Result of a chat completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// Minimal abstraction around a chat completion provider.
///
/// The model identifier is an explicit per-call argument; concurrent requests
/// with different models never share mutable provider state.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        model: Option<&str>,
    ) -> Result<ModelCompletion>;
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> FlowError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return FlowError::Generation(format!("{provider} rate limit exceeded: {body}"));
    }
    FlowError::Generation(format!("{provider} request failed with {status}: {body}"))
}

/// Ollama client for local inference. Local models can be slow, so the HTTP
/// timeout is generous and configurable.
#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    model: String,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, model, Duration::from_secs(300))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|err| FlowError::Generation(format!("http client error: {err}")))?,
            model: model.into(),
            base_url: base_url.into(),
        })
    }

    pub fn from_config(cfg: &GenerationConfig) -> Result<Self> {
        Self::with_timeout(
            cfg.base_url.clone(),
            cfg.model.clone(),
            Duration::from_secs(cfg.timeout_secs),
        )
    }

    pub fn default_model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
        model: Option<&str>,
    ) -> Result<ModelCompletion> {
        let ollama_messages: Vec<Value> = messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                };
                json!({
                    "role": role,
                    "content": m.content.clone()
                })
            })
            .collect();

        let mut body = json!({
            "model": model.unwrap_or(&self.model),
            "messages": ollama_messages,
            "stream": false
        });

        if !tools.is_empty() {
            let ollama_tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters
                        }
                    })
                })
                .collect();
            body["tools"] = json!(ollama_tools);
        }

        let resp = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| FlowError::Generation(format!("Ollama request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "Ollama"));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| FlowError::Generation(format!("Ollama parse error: {e}")))?;

        let message = &json["message"];
        let content = message["content"].as_str().map(String::from);

        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let func = &call["function"];
                let name = func["name"].as_str().unwrap_or("").to_string();
                let arguments = func["arguments"].clone();
                tool_calls.push(ToolCall {
                    id: None,
                    name,
                    arguments,
                });
            }
        }

        Ok(ModelCompletion { content, tool_calls })
    }
}

/// A deterministic model used for tests and demos. Responses are scripted as
/// JSON directives and consumed in order.
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum StubDirective {
    Respond { content: String },
    CallTool { name: String, arguments: Value },
    Fail { message: String },
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete_chat(
        &self,
        _messages: &[Message],
        _tools: &[ToolDescriptor],
        _model: Option<&str>,
    ) -> Result<ModelCompletion> {
        let raw = {
            let mut locked = self.responses.lock().expect("stub model poisoned");
            locked.pop_front().ok_or_else(|| {
                FlowError::Generation("StubModel ran out of scripted responses".into())
            })?
        };

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
            Ok(StubDirective::Fail { message }) => Err(FlowError::Generation(message)),
            Err(_) => Ok(ModelCompletion {
                content: Some(raw),
                tool_calls: Vec::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_model_replays_directives_in_order() {
        let model = StubModel::new(vec![
            r#"{"action":"call_tool","name":"query","arguments":{"limit":1}}"#.into(),
            r#"{"action":"respond","content":"done"}"#.into(),
        ]);

        let first = model.complete_chat(&[], &[], None).await.unwrap();
        assert_eq!(first.tool_calls.len(), 1);
        assert_eq!(first.tool_calls[0].name, "query");

        let second = model.complete_chat(&[], &[], None).await.unwrap();
        assert_eq!(second.content.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn stub_model_can_script_a_failure() {
        let model = StubModel::new(vec![r#"{"action":"fail","message":"down"}"#.into()]);
        let err = model.complete_chat(&[], &[], None).await.unwrap_err();
        assert!(matches!(err, FlowError::Generation(_)));
    }

    #[tokio::test]
    async fn unscripted_stub_model_fails_with_generation_error() {
        let model = StubModel::new(Vec::new());
        let err = model.complete_chat(&[], &[], None).await.unwrap_err();
        assert!(matches!(err, FlowError::Generation(_)));
    }
}
