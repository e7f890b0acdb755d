//! Natural-language summarization of a chain payload.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::{FlowError, Result};
use crate::llm::LanguageModel;
use crate::message::Message;

/// Instruction template for the generation request. The wording forbids the
/// model from echoing the underlying structure back to the user.
pub const SUMMARY_PROMPT_TEMPLATE: &str = "\
You are an expert assistant with access to company information.

Your task is to present the information below in a clear and human-friendly way.
Do NOT mention JSON, tools, field names, or technical structure.
Speak naturally, as if you looked into the system yourself.

Here is the information you found:
{payload}

{instruction}";

const DEFAULT_INSTRUCTION: &str = "Summarize this record in a few sentences.";

/// Packages a structured payload into a generation request.
pub struct Summarizer<M: LanguageModel> {
    model: Arc<M>,
    timeout: Duration,
    template: String,
}

impl<M: LanguageModel> Summarizer<M> {
    pub fn new(model: Arc<M>, timeout: Duration) -> Self {
        Self {
            model,
            timeout,
            template: SUMMARY_PROMPT_TEMPLATE.to_string(),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Ask the model for a prose rendering of the payload. Timeouts and
    /// remote failures both surface as generation errors; the caller decides
    /// whether that is fatal.
    pub async fn summarize(
        &self,
        payload: &Map<String, Value>,
        instruction: Option<&str>,
        model: Option<&str>,
    ) -> Result<String> {
        let prompt = render_prompt(&self.template, payload, instruction);
        let messages = [Message::user(prompt)];

        let completion =
            match tokio::time::timeout(self.timeout, self.model.complete_chat(&messages, &[], model))
                .await
            {
                Ok(result) => result?,
                Err(_) => return Err(FlowError::Generation("generation timed out".into())),
            };

        completion
            .content
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| FlowError::Generation("model returned no content".into()))
    }
}

fn render_prompt(template: &str, payload: &Map<String, Value>, instruction: Option<&str>) -> String {
    let mut lines = Vec::with_capacity(payload.len());
    for (key, value) in payload {
        let rendered = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        lines.push(format!("- {}: {}", display_key(key), rendered));
    }
    template
        .replace("{payload}", &lines.join("\n"))
        .replace("{instruction}", instruction.unwrap_or(DEFAULT_INSTRUCTION))
}

/// `company_name` reads better as `company name` in a prose prompt.
fn display_key(key: &str) -> String {
    key.replace('_', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubModel;
    use serde_json::json;

    fn payload() -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("company_name".into(), json!("Alpha Test SARL"));
        map.insert("status".into(), json!("Active"));
        map
    }

    #[test]
    fn prompt_substitutes_payload_and_instruction() {
        let prompt = render_prompt(SUMMARY_PROMPT_TEMPLATE, &payload(), Some("Name and status only."));
        assert!(prompt.contains("- company name: Alpha Test SARL"));
        assert!(prompt.contains("- status: Active"));
        assert!(prompt.contains("Name and status only."));
        assert!(!prompt.contains("{payload}"));
        assert!(!prompt.contains("{instruction}"));
    }

    #[tokio::test]
    async fn summarize_returns_model_prose() {
        let model = StubModel::new(vec![
            r#"{"action":"respond","content":"Alpha Test SARL is an active company."}"#.into(),
        ]);
        let summarizer = Summarizer::new(model, Duration::from_secs(5));

        let summary = summarizer.summarize(&payload(), None, None).await.unwrap();
        assert_eq!(summary, "Alpha Test SARL is an active company.");
    }

    #[tokio::test]
    async fn empty_completion_is_a_generation_error() {
        let model = StubModel::new(vec![r#"{"action":"respond","content":"  "}"#.into()]);
        let summarizer = Summarizer::new(model, Duration::from_secs(5));

        let err = summarizer.summarize(&payload(), None, None).await.unwrap_err();
        assert!(matches!(err, FlowError::Generation(_)));
    }
}
