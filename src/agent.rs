use std::sync::Arc;

use crate::error::{FlowError, Result};
use crate::llm::LanguageModel;
use crate::message::Message;
use crate::registry::ToolRegistry;

const SYSTEM_PROMPT: &str = "\
You are a tool-calling agent. You must use the available tools to answer \
questions about the underlying data; never describe the process, never write \
code, and never guess values a tool can provide. Answer with the final \
result only.";

/// An agent that alternates between the model and discovered tools until the
/// model produces a final reply. State lives for one exchange only; every
/// request starts from a fresh conversation.
pub struct Agent<M: LanguageModel> {
    system_prompt: String,
    model: Arc<M>,
    max_steps: usize,
}

impl<M: LanguageModel> Agent<M> {
    pub fn new(model: Arc<M>) -> Self {
        Self {
            system_prompt: SYSTEM_PROMPT.to_string(),
            model,
            max_steps: 6,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Run a single exchange. Returns the final assistant reply.
    pub async fn respond(
        &self,
        registry: &ToolRegistry,
        user_input: impl Into<String>,
        model: Option<&str>,
    ) -> Result<String> {
        let tools = registry.descriptors();
        let mut messages = vec![
            Message::system(&self.system_prompt),
            Message::user(user_input),
        ];

        for _ in 0..self.max_steps {
            let completion = self.model.complete_chat(&messages, &tools, model).await?;

            if completion.tool_calls.is_empty() {
                return completion
                    .content
                    .filter(|text| !text.trim().is_empty())
                    .ok_or_else(|| {
                        FlowError::Protocol("model returned neither content nor a tool call".into())
                    });
            }

            for call in completion.tool_calls {
                tracing::info!(tool = %call.name, "agent requested tool call");
                messages.push(Message::tool_request(call.clone()));
                let output = registry.call(&call.name, call.arguments).await?;
                messages.push(Message::tool(&call.name, output));
            }
        }

        Err(FlowError::Protocol(
            "agent reached the step limit without returning a response".into(),
        ))
    }
}
