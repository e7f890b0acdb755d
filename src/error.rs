use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FlowError>;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("tool discovery failed: {0}")]
    Discovery(String),

    #[error("invalid binding in step {step}: {message}")]
    Binding { step: usize, message: String },

    #[error("tool `{0}` not found")]
    ToolNotFound(String),

    #[error("tool `{name}` invocation failed: {source}")]
    ToolInvocation {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("`{0}` timed out")]
    Timeout(String),

    #[error("field `{0}` missing from tool result")]
    FieldMissing(String),

    #[error("no `{0}` value found in tool output")]
    PatternNotFound(String),

    #[error("text generation failed: {0}")]
    Generation(String),

    #[error("chain step {step} (`{tool}`) failed: {kind}")]
    Step {
        step: usize,
        tool: String,
        kind: ErrorKind,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Stable error classification reported to callers. Remote error details
/// stay in the logs; the facade only ever sees the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Discovery,
    Binding,
    ToolNotFound,
    ToolInvocation,
    Timeout,
    FieldMissing,
    PatternNotFound,
    Generation,
    Protocol,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Discovery => "discovery",
            ErrorKind::Binding => "binding",
            ErrorKind::ToolNotFound => "tool_not_found",
            ErrorKind::ToolInvocation => "tool_invocation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::FieldMissing => "field_missing",
            ErrorKind::PatternNotFound => "pattern_not_found",
            ErrorKind::Generation => "generation",
            ErrorKind::Protocol => "protocol",
        };
        f.write_str(label)
    }
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::Discovery(_) => ErrorKind::Discovery,
            FlowError::Binding { .. } => ErrorKind::Binding,
            FlowError::ToolNotFound(_) => ErrorKind::ToolNotFound,
            FlowError::ToolInvocation { .. } => ErrorKind::ToolInvocation,
            FlowError::Timeout(_) => ErrorKind::Timeout,
            FlowError::FieldMissing(_) => ErrorKind::FieldMissing,
            FlowError::PatternNotFound(_) => ErrorKind::PatternNotFound,
            FlowError::Generation(_) => ErrorKind::Generation,
            FlowError::Step { kind, .. } => *kind,
            FlowError::Protocol(_) | FlowError::Io(_) | FlowError::Serde(_) => ErrorKind::Protocol,
        }
    }
}
