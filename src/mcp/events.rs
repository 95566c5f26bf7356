use serde_json::Value;

/// A notification pushed by an MCP server, forwarded to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct McpServerNotification {
    pub server_id: String,
    pub method: String,
    pub params: Option<Value>,
}
