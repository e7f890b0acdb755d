//! Declarative tool chains and their executor.
//!
//! A chain is a fixed, ordered list of tool invocations with declared data
//! dependencies: each step names a tool, binds its parameters to literals or
//! to values extracted by strictly earlier steps, and declares which of its
//! own extracted values become part of the final payload. Dependencies are
//! validated when the definition is built, never at run time.

use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::error::{FlowError, Result};
use crate::extract::ExtractionRule;
use crate::llm::LanguageModel;
use crate::registry::ToolRegistry;
use crate::summarize::Summarizer;

/// How a tool parameter gets its value.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Literal(Value),
    /// A value extracted by an earlier step, referenced by step index and
    /// extraction name.
    FromStep { step: usize, value: String },
}

impl Binding {
    pub fn literal(value: impl Into<Value>) -> Self {
        Binding::Literal(value.into())
    }

    pub fn from_step(step: usize, value: impl Into<String>) -> Self {
        Binding::FromStep {
            step,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Extraction {
    name: String,
    rule: ExtractionRule,
    exposed: bool,
}

#[derive(Debug, Clone)]
pub struct ChainStep {
    tool: String,
    bindings: Vec<(String, Binding)>,
    extractions: Vec<Extraction>,
}

impl ChainStep {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            bindings: Vec::new(),
            extractions: Vec::new(),
        }
    }

    pub fn bind_literal(mut self, param: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bindings.push((param.into(), Binding::literal(value)));
        self
    }

    pub fn bind_from(
        mut self,
        param: impl Into<String>,
        step: usize,
        value: impl Into<String>,
    ) -> Self {
        self.bindings
            .push((param.into(), Binding::from_step(step, value)));
        self
    }

    /// Extract a value for threading into later steps without exposing it in
    /// the payload.
    pub fn extract(mut self, name: impl Into<String>, rule: ExtractionRule) -> Self {
        self.extractions.push(Extraction {
            name: name.into(),
            rule,
            exposed: false,
        });
        self
    }

    /// Extract a value and include it in the chain's final payload.
    pub fn extract_exposed(mut self, name: impl Into<String>, rule: ExtractionRule) -> Self {
        self.extractions.push(Extraction {
            name: name.into(),
            rule,
            exposed: true,
        });
        self
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }
}

/// An immutable, validated chain. Construct through [`ChainDefinition::builder`].
#[derive(Debug, Clone)]
pub struct ChainDefinition {
    name: String,
    steps: Vec<ChainStep>,
    summary_instruction: Option<String>,
}

impl ChainDefinition {
    pub fn builder(name: impl Into<String>) -> ChainBuilder {
        ChainBuilder {
            name: name.into(),
            steps: Vec::new(),
            summary_instruction: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    pub fn summary_instruction(&self) -> Option<&str> {
        self.summary_instruction.as_deref()
    }
}

pub struct ChainBuilder {
    name: String,
    steps: Vec<ChainStep>,
    summary_instruction: Option<String>,
}

impl ChainBuilder {
    pub fn step(mut self, step: ChainStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn summary_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.summary_instruction = Some(instruction.into());
        self
    }

    /// Validate the definition. Every binding must reference an extraction of
    /// a strictly earlier step, and exposed payload names must be unique.
    pub fn build(self) -> Result<ChainDefinition> {
        let mut exposed = std::collections::HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            for (param, binding) in &step.bindings {
                if let Binding::FromStep { step: source, value } = binding {
                    if *source >= index {
                        return Err(FlowError::Binding {
                            step: index,
                            message: format!(
                                "parameter `{param}` references step {source}, which is not an earlier step"
                            ),
                        });
                    }
                    let defined = self.steps[*source]
                        .extractions
                        .iter()
                        .any(|e| e.name == *value);
                    if !defined {
                        return Err(FlowError::Binding {
                            step: index,
                            message: format!(
                                "parameter `{param}` references `{value}`, which step {source} does not extract"
                            ),
                        });
                    }
                }
            }
            for extraction in &step.extractions {
                if extraction.exposed && !exposed.insert(extraction.name.clone()) {
                    return Err(FlowError::Binding {
                        step: index,
                        message: format!("payload name `{}` is exposed twice", extraction.name),
                    });
                }
            }
        }
        Ok(ChainDefinition {
            name: self.name,
            steps: self.steps,
            summary_instruction: self.summary_instruction,
        })
    }
}

/// Per-run scratch state. Both collections are append-only: a step's results
/// are pushed exactly once, in step order.
#[derive(Debug, Default)]
struct ExecutionContext {
    step_outputs: Vec<Map<String, Value>>,
    raw_results: Vec<Value>,
}

impl ExecutionContext {
    fn record(&mut self, raw: Value, outputs: Map<String, Value>) {
        self.raw_results.push(raw);
        self.step_outputs.push(outputs);
    }

    fn output(&self, step: usize, name: &str) -> Option<&Value> {
        self.step_outputs.get(step).and_then(|m| m.get(name))
    }
}

/// Marker reported in place of prose when the generation call failed.
pub const SUMMARY_UNAVAILABLE: &str = "summary unavailable";

/// The result of a finished chain run. `summary` is absent when the
/// generation call failed; the payload survives regardless.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub payload: Map<String, Value>,
    pub summary: Option<String>,
}

/// Executes chains strictly in step order, one run at a time per context.
#[derive(Clone)]
pub struct ChainExecutor {
    step_timeout: Duration,
    events: Option<broadcast::Sender<String>>,
}

impl ChainExecutor {
    pub fn new(step_timeout: Duration) -> Self {
        Self {
            step_timeout,
            events: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<String>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: String) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Run every step and assemble the exposed payload. The first invocation
    /// or extraction failure aborts the run; no later step is attempted.
    pub async fn execute(
        &self,
        chain: &ChainDefinition,
        registry: &ToolRegistry,
    ) -> Result<Map<String, Value>> {
        let mut ctx = ExecutionContext::default();

        for (index, step) in chain.steps.iter().enumerate() {
            let arguments = resolve_bindings(step, &ctx)?;
            self.emit(format!("chain:{}:step:{index}:{}", chain.name, step.tool));
            tracing::info!(chain = %chain.name, step = index, tool = %step.tool, "invoking tool");

            let invocation = registry.call(&step.tool, arguments);
            let raw = match tokio::time::timeout(self.step_timeout, invocation).await {
                Ok(Ok(raw)) => raw,
                Ok(Err(err)) => return Err(self.fail(chain, index, step, err)),
                Err(_) => {
                    return Err(self.fail(chain, index, step, FlowError::Timeout(step.tool.clone())))
                }
            };

            let mut outputs = Map::new();
            for extraction in &step.extractions {
                match extraction.rule.extract(&raw) {
                    Ok(value) => {
                        outputs.insert(extraction.name.clone(), value);
                    }
                    Err(err) => return Err(self.fail(chain, index, step, err)),
                }
            }
            ctx.record(raw, outputs);
        }

        tracing::debug!(chain = %chain.name, steps = ctx.raw_results.len(), "all steps complete");

        let mut payload = Map::new();
        for (index, step) in chain.steps.iter().enumerate() {
            for extraction in &step.extractions {
                if !extraction.exposed {
                    continue;
                }
                if let Some(value) = ctx.output(index, &extraction.name) {
                    payload.insert(extraction.name.clone(), value.clone());
                }
            }
        }
        Ok(payload)
    }

    /// Full run: execute, then ask for a natural-language summary. A failed
    /// generation call degrades to a summary-less outcome instead of losing
    /// the payload.
    pub async fn run<M: LanguageModel>(
        &self,
        chain: &ChainDefinition,
        registry: &ToolRegistry,
        summarizer: &Summarizer<M>,
        model: Option<&str>,
    ) -> Result<ChainOutcome> {
        self.emit(format!("chain:{}:executing", chain.name));
        let payload = self.execute(chain, registry).await?;

        self.emit(format!("chain:{}:summarizing", chain.name));
        let summary = match summarizer
            .summarize(&payload, chain.summary_instruction(), model)
            .await
        {
            Ok(text) => Some(text),
            Err(err) => {
                tracing::warn!(chain = %chain.name, error = %err, "summarization failed, returning payload without summary");
                None
            }
        };

        self.emit(format!("chain:{}:done", chain.name));
        Ok(ChainOutcome { payload, summary })
    }

    fn fail(&self, chain: &ChainDefinition, index: usize, step: &ChainStep, err: FlowError) -> FlowError {
        let kind = err.kind();
        tracing::error!(chain = %chain.name, step = index, tool = %step.tool, error = %err, "chain step failed");
        self.emit(format!("chain:{}:failed:{kind}", chain.name));
        FlowError::Step {
            step: index,
            tool: step.tool.clone(),
            kind,
        }
    }
}

impl Default for ChainExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

fn resolve_bindings(step: &ChainStep, ctx: &ExecutionContext) -> Result<Value> {
    let mut arguments = Map::new();
    for (param, binding) in &step.bindings {
        let value = match binding {
            Binding::Literal(value) => value.clone(),
            Binding::FromStep { step: source, value } => ctx
                .output(*source, value)
                .cloned()
                // Unreachable for definitions that passed `build`; earlier
                // steps either recorded every extraction or aborted the run.
                .ok_or_else(|| {
                    FlowError::Protocol(format!(
                        "binding `{param}` resolved to a value step {source} never produced"
                    ))
                })?,
        };
        arguments.insert(param.clone(), value);
    }
    Ok(Value::Object(arguments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn two_step_chain() -> ChainBuilder {
        ChainDefinition::builder("lookup")
            .step(
                ChainStep::new("lookupId")
                    .extract_exposed("id", ExtractionRule::field("id")),
            )
            .step(
                ChainStep::new("lookupDetails")
                    .bind_from("id", 0, "id")
                    .extract_exposed("status", ExtractionRule::field("status")),
            )
    }

    #[test]
    fn well_formed_definition_builds() {
        assert!(two_step_chain().build().is_ok());
    }

    #[test]
    fn self_reference_is_rejected() {
        let err = ChainDefinition::builder("bad")
            .step(
                ChainStep::new("lookupId")
                    .bind_from("id", 0, "id")
                    .extract("id", ExtractionRule::field("id")),
            )
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Binding);
    }

    #[test]
    fn forward_reference_is_rejected() {
        let err = ChainDefinition::builder("bad")
            .step(ChainStep::new("lookupDetails").bind_from("id", 1, "id"))
            .step(ChainStep::new("lookupId").extract("id", ExtractionRule::field("id")))
            .build()
            .unwrap_err();
        assert!(matches!(err, FlowError::Binding { step: 0, .. }));
    }

    #[test]
    fn reference_to_undeclared_value_is_rejected() {
        let err = ChainDefinition::builder("bad")
            .step(ChainStep::new("lookupId").extract("id", ExtractionRule::field("id")))
            .step(ChainStep::new("lookupDetails").bind_from("id", 0, "identifier"))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Binding);
    }

    #[test]
    fn duplicate_exposed_name_is_rejected() {
        let err = ChainDefinition::builder("bad")
            .step(ChainStep::new("a").extract_exposed("id", ExtractionRule::field("id")))
            .step(ChainStep::new("b").extract_exposed("id", ExtractionRule::field("id")))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Binding);
    }
}
