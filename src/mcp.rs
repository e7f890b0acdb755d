//! MCP (Model Context Protocol) client support.
//!
//! Tool servers speak JSON-RPC over HTTP: an `initialize` handshake, then
//! `tools/list` and `tools/call`. [`McpToolProvider`] adapts a connected
//! client to the [`ToolProvider`](crate::registry::ToolProvider) contract so
//! the registry can treat MCP servers like any other tool source.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{FlowError, Result};
use crate::registry::{ToolDescriptor, ToolProvider};

// ─────────────────────────────────────────────────────────────────────────────
// Protocol types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Tool definition as the server advertises it.
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<McpToolDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentItem {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "resource")]
    Resource { resource: Value },
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub resources: Option<Value>,
    #[serde(default)]
    pub prompts: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Transport layer for MCP communication.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;
}

/// HTTP transport posting JSON-RPC requests to a single endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    request_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            request_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        request.id = self.request_id.fetch_add(1, Ordering::SeqCst);

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| FlowError::Protocol(format!("MCP request failed: {e}")))?;

        response
            .json()
            .await
            .map_err(|e| FlowError::Protocol(format!("malformed MCP response: {e}")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

pub struct McpClient<T: McpTransport> {
    transport: T,
    initialized: bool,
    server_info: Option<ServerInfo>,
}

impl<T: McpTransport> McpClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            initialized: false,
            server_info: None,
        }
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let response = self
            .transport
            .send(JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                id: 0,
                method: method.to_string(),
                params,
            })
            .await?;

        if let Some(error) = response.error {
            return Err(FlowError::Protocol(format!("{method} failed: {}", error.message)));
        }
        Ok(response.result.unwrap_or_default())
    }

    /// Perform the initialize handshake once.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let result = self
            .request(
                "initialize",
                Some(serde_json::json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {
                        "name": "toolflow",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            )
            .await?;

        let parsed: InitializeResult = serde_json::from_value(result)
            .map_err(|e| FlowError::Protocol(format!("malformed initialize result: {e}")))?;
        self.server_info = Some(parsed.server_info);
        self.initialized = true;

        let _ = self.request("notifications/initialized", None).await;
        Ok(())
    }

    pub async fn list_tools(&mut self) -> Result<Vec<McpToolDefinition>> {
        self.initialize().await?;
        let result = self.request("tools/list", None).await?;
        let parsed: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| FlowError::Protocol(format!("malformed tools/list result: {e}")))?;
        Ok(parsed.tools)
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.initialize().await?;
        let result = self
            .request(
                "tools/call",
                Some(serde_json::json!({
                    "name": name,
                    "arguments": arguments
                })),
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|e| FlowError::Protocol(format!("malformed tools/call result: {e}")))
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ToolProvider adapter
// ─────────────────────────────────────────────────────────────────────────────

/// Exposes one MCP server as a tool provider.
pub struct McpToolProvider<T: McpTransport> {
    name: String,
    client: Mutex<McpClient<T>>,
}

impl McpToolProvider<HttpTransport> {
    /// Connect to an MCP server over HTTP.
    pub fn over_http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(name, McpClient::new(HttpTransport::new(url)))
    }
}

impl<T: McpTransport> McpToolProvider<T> {
    pub fn new(name: impl Into<String>, client: McpClient<T>) -> Self {
        Self {
            name: name.into(),
            client: Mutex::new(client),
        }
    }
}

/// Flatten MCP content items into one raw result value. Text that parses as
/// JSON is surfaced structured; anything else stays a string.
fn flatten_content(content: Vec<ContentItem>) -> Value {
    let text: Vec<String> = content
        .into_iter()
        .map(|item| match item {
            ContentItem::Text { text } => text,
            ContentItem::Resource { resource } => resource.to_string(),
        })
        .collect();
    let joined = text.join("\n");
    serde_json::from_str(&joined).unwrap_or(Value::String(joined))
}

#[async_trait]
impl<T: McpTransport> ToolProvider for McpToolProvider<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let mut client = self.client.lock().await;
        let tools = client
            .list_tools()
            .await
            .map_err(|err| FlowError::Discovery(format!("provider `{}`: {err}", self.name)))?;

        Ok(tools
            .into_iter()
            .map(|tool| ToolDescriptor {
                description: tool
                    .description
                    .unwrap_or_else(|| format!("MCP tool: {}", tool.name)),
                name: tool.name,
                parameters: tool.input_schema,
                provider: self.name.clone(),
            })
            .collect())
    }

    async fn invoke(&self, tool: &str, arguments: Value) -> Result<Value> {
        let mut client = self.client.lock().await;
        let result = client
            .call_tool(tool, arguments)
            .await
            .map_err(|err| FlowError::ToolInvocation {
                name: tool.to_string(),
                source: Box::new(err),
            })?;

        if result.is_error {
            let message = flatten_content(result.content);
            return Err(FlowError::ToolInvocation {
                name: tool.to_string(),
                source: message.to_string().into(),
            });
        }
        Ok(flatten_content(result.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct ScriptedTransport;

    #[async_trait]
    impl McpTransport for ScriptedTransport {
        async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
            let result = match request.method.as_str() {
                "initialize" => json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "db-server", "version": "1.0"}
                }),
                "notifications/initialized" => json!({}),
                "tools/list" => json!({
                    "tools": [{
                        "name": "get_first_row_mdl_societe",
                        "description": "First row of the societe view",
                        "inputSchema": {"type": "object", "properties": {}}
                    }]
                }),
                "tools/call" => json!({
                    "content": [{"type": "text", "text": "{\"SOC_ID\": \"SOCIETE_TEST_123\"}"}],
                    "isError": false
                }),
                other => return Err(FlowError::Protocol(format!("unexpected method {other}"))),
            };
            Ok(JsonRpcResponse {
                jsonrpc: "2.0".into(),
                id: request.id,
                result: Some(result),
                error: None,
            })
        }
    }

    #[test]
    fn json_rpc_request_serialization() {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: 1,
            method: "tools/list".to_string(),
            params: None,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"tools/list\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn json_rpc_response_deserialization() {
        let json = r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#;
        let response: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.id, 1);
        assert!(response.result.is_some());
        assert!(response.error.is_none());
    }

    #[test]
    fn tool_definition_deserialization() {
        let json = r#"{
            "name": "get_documents",
            "description": "Retrieve documents from a collection",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "collection_name": {"type": "string"},
                    "limit": {"type": "integer"}
                },
                "required": ["collection_name"]
            }
        }"#;

        let tool: McpToolDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(tool.name, "get_documents");
        assert!(tool.input_schema["properties"]["limit"].is_object());
    }

    #[tokio::test]
    async fn provider_lists_and_invokes_over_scripted_transport() {
        let provider =
            McpToolProvider::new("db", McpClient::new(ScriptedTransport));

        let tools = provider.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].provider, "db");

        let raw = provider
            .invoke("get_first_row_mdl_societe", json!({}))
            .await
            .unwrap();
        assert_eq!(raw["SOC_ID"], json!("SOCIETE_TEST_123"));
    }

    #[test]
    fn plain_text_content_stays_a_string() {
        let value = flatten_content(vec![ContentItem::Text {
            text: "no json here".into(),
        }]);
        assert_eq!(value, Value::String("no json here".into()));
    }
}
