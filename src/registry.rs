//! Tool discovery and dispatch.
//!
//! A [`ToolProvider`] is a remote server exposing named, schema-described
//! operations. [`ToolRegistry::discover`] asks every configured provider for
//! its tools and normalizes them into a uniform [`ToolDescriptor`] map; calls
//! are then routed back to the provider that owns the name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::{FlowError, Result};

/// A normalized description of one remote operation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool's input parameters.
    pub parameters: Value,
    /// Name of the provider the tool was discovered from.
    pub provider: String,
}

/// A remote service exposing callable tools.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Enumerate the provider's tools. Errors map to [`FlowError::Discovery`].
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Invoke a named tool. The call is a network round trip and may be slow;
    /// callers are responsible for timeouts.
    async fn invoke(&self, tool: &str, arguments: Value) -> Result<Value>;
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    provider: Arc<dyn ToolProvider>,
}

/// Immutable mapping of tool name to descriptor and owning provider.
///
/// Safe to share read-only across concurrent chain runs.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    /// Discover tools from every provider, in order.
    ///
    /// A provider that fails to answer only loses its own tools; the caller
    /// decides whether a missing tool is fatal when it tries to call it. On a
    /// name collision the first-discovered provider wins. Discovery errors
    /// out only when every configured provider failed.
    pub async fn discover(providers: &[Arc<dyn ToolProvider>]) -> Result<Self> {
        let mut tools: HashMap<String, RegisteredTool> = HashMap::new();
        let mut failures = Vec::new();

        for provider in providers {
            let listed = match provider.list_tools().await {
                Ok(listed) => listed,
                Err(err) => {
                    tracing::warn!(provider = provider.name(), error = %err, "provider discovery failed, skipping");
                    failures.push(format!("{}: {err}", provider.name()));
                    continue;
                }
            };
            for descriptor in listed {
                if tools.contains_key(&descriptor.name) {
                    tracing::warn!(
                        tool = %descriptor.name,
                        provider = provider.name(),
                        "tool name already registered, keeping first-discovered provider"
                    );
                    continue;
                }
                tools.insert(
                    descriptor.name.clone(),
                    RegisteredTool {
                        descriptor,
                        provider: Arc::clone(provider),
                    },
                );
            }
        }

        if tools.is_empty() && !failures.is_empty() {
            return Err(FlowError::Discovery(failures.join("; ")));
        }

        tracing::info!(tools = tools.len(), "tool discovery complete");
        Ok(Self { tools })
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name).map(|t| &t.descriptor)
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor.clone()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Route a call to the provider that owns `name`.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| FlowError::ToolNotFound(name.to_string()))?;
        tool.provider.invoke(name, arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticProvider {
        name: &'static str,
        tools: Vec<&'static str>,
        calls: AtomicUsize,
    }

    impl StaticProvider {
        fn new(name: &'static str, tools: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                name,
                tools,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ToolProvider for StaticProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            Ok(self
                .tools
                .iter()
                .map(|t| ToolDescriptor {
                    name: t.to_string(),
                    description: String::new(),
                    parameters: json!({"type": "object", "properties": {}}),
                    provider: self.name.to_string(),
                })
                .collect())
        }

        async fn invoke(&self, tool: &str, _arguments: Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"tool": tool}))
        }
    }

    struct BrokenProvider;

    #[async_trait]
    impl ToolProvider for BrokenProvider {
        fn name(&self) -> &str {
            "broken"
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            Err(FlowError::Discovery("unreachable".into()))
        }

        async fn invoke(&self, _tool: &str, _arguments: Value) -> Result<Value> {
            unreachable!("broken provider never registers tools")
        }
    }

    #[tokio::test]
    async fn partial_discovery_skips_failed_provider() {
        let good = StaticProvider::new("db", vec!["query"]);
        let providers: Vec<Arc<dyn ToolProvider>> = vec![Arc::new(BrokenProvider), good];

        let registry = ToolRegistry::discover(&providers).await.unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("query").is_some());
    }

    #[tokio::test]
    async fn discovery_fails_when_all_providers_fail() {
        let providers: Vec<Arc<dyn ToolProvider>> = vec![Arc::new(BrokenProvider)];
        let err = ToolRegistry::discover(&providers).await.unwrap_err();
        assert!(matches!(err, FlowError::Discovery(_)));
    }

    #[tokio::test]
    async fn first_discovered_provider_wins_on_collision() {
        let first = StaticProvider::new("first", vec!["lookup"]);
        let second = StaticProvider::new("second", vec!["lookup"]);
        let providers: Vec<Arc<dyn ToolProvider>> = vec![first.clone(), second.clone()];

        let registry = ToolRegistry::discover(&providers).await.unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("lookup").unwrap().provider, "first");

        registry.call("lookup", json!({})).await.unwrap();
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_tool_is_an_explicit_error() {
        let providers: Vec<Arc<dyn ToolProvider>> = vec![StaticProvider::new("db", vec!["query"])];
        let registry = ToolRegistry::discover(&providers).await.unwrap();

        let err = registry.call("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, FlowError::ToolNotFound(name) if name == "missing"));
    }
}
