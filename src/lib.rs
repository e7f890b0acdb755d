//! Orchestration layer for chaining MCP tool calls behind an HTTP facade.
//!
//! The crate provides:
//! - A tool registry that discovers remote operations from MCP servers
//!   (`ToolRegistry`, `ToolProvider`, `McpToolProvider`).
//! - Declarative multi-step chains with validated data dependencies and a
//!   sequential executor (`ChainDefinition`, `ChainExecutor`).
//! - Pure extraction rules that pull typed values out of raw tool results
//!   (`ExtractionRule`).
//! - An LLM-backed summarizer and a free-form tool-calling agent
//!   (`Summarizer`, `Agent`, `LanguageModel`).
//! - An axum service exposing prompt, chain and tool-listing endpoints
//!   (`AgentService`).

mod agent;
mod chain;
mod chains;
mod config;
mod error;
mod extract;
mod llm;
mod mcp;
mod message;
mod registry;
mod server;
mod summarize;

pub use agent::Agent;
pub use chain::{
    Binding, ChainBuilder, ChainDefinition, ChainExecutor, ChainOutcome, ChainStep,
    SUMMARY_UNAVAILABLE,
};
pub use chains::{builtin_chains, company_lookup};
pub use config::{AppConfig, ChainSettings, GenerationConfig, ProviderConfig, ServerConfig};
pub use error::{ErrorKind, FlowError, Result};
pub use extract::ExtractionRule;
pub use llm::{LanguageModel, ModelCompletion, OllamaClient, StubModel};
pub use mcp::{
    HttpTransport, JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpClient, McpToolDefinition,
    McpToolProvider, McpTransport,
};
pub use message::{Message, Role, ToolCall, ToolResult};
pub use registry::{ToolDescriptor, ToolProvider, ToolRegistry};
pub use server::{AgentService, ChainRequest, ChainResponse, PromptRequest, PromptResponse};
pub use summarize::{Summarizer, SUMMARY_PROMPT_TEMPLATE};
