//! JSON-RPC envelopes exchanged with stdio servers.
//!
//! Every message is one JSON object on its own line. Outgoing requests carry
//! an integer id; incoming messages are classified by the presence of `id`
//! and `method`. Result payloads are left as raw JSON here and decoded into
//! `rust_mcp_schema` types by whoever awaits them.

use rust_mcp_schema::{CallToolResult, ContentBlock, RequestId, RpcError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::mcp::McpError;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC code used by servers to indicate unsupported methods.
pub const MCP_METHOD_NOT_FOUND: i64 = -32601;

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_PING: &str = "ping";
pub const METHOD_LOG_MESSAGE: &str = "notifications/message";

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

/// Our answer to a request the server sent us.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcReply {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl JsonRpcReply {
    pub fn result(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(serde_json::json!({
                "code": MCP_METHOD_NOT_FOUND,
                "message": format!("Method not found: {method}"),
            })),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// An incoming message from an MCP server.
#[derive(Debug)]
pub enum ServerMessage {
    /// Reply to one of our requests.
    Response {
        id: RequestId,
        outcome: Result<Value, RpcError>,
    },
    /// Server-initiated request; expects a reply from us.
    Request {
        id: RequestId,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
}

impl ServerMessage {
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        let raw: RawMessage = serde_json::from_str(line)?;
        match (raw.id, raw.method) {
            (Some(id), Some(method)) => Ok(ServerMessage::Request {
                id,
                method,
                params: raw.params,
            }),
            (Some(id), None) => {
                let outcome = match raw.error {
                    Some(error) => Err(error),
                    None => Ok(raw.result.unwrap_or(Value::Null)),
                };
                Ok(ServerMessage::Response { id, outcome })
            }
            (None, Some(method)) => Ok(ServerMessage::Notification {
                method,
                params: raw.params,
            }),
            (None, None) => Err(<serde_json::Error as serde::de::Error>::custom(
                "message has neither id nor method",
            )),
        }
    }
}

/// Splits a byte stream into complete lines, keeping any trailing fragment
/// until the rest of it arrives.
#[derive(Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        self.drain_lines(false)
    }

    pub fn finish(&mut self) -> Vec<String> {
        self.drain_lines(true)
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn drain_lines(&mut self, flush: bool) -> Vec<String> {
        let mut lines = Vec::new();
        let mut search_index = 0;

        while let Some(relative_pos) = memchr::memchr(b'\n', &self.buffer[search_index..]) {
            let newline_index = search_index + relative_pos;
            push_line(&mut lines, &self.buffer[search_index..newline_index]);
            search_index = newline_index + 1;
        }

        if flush {
            push_line(&mut lines, &self.buffer[search_index..]);
            self.buffer.clear();
        } else if search_index > 0 {
            self.buffer.drain(..search_index);
        }

        lines
    }
}

/// Lines that are not valid UTF-8 are dropped whole rather than repaired, so
/// a corrupted response can never resolve a request with altered content.
fn push_line(lines: &mut Vec<String>, bytes: &[u8]) {
    match std::str::from_utf8(bytes) {
        Ok(text) => {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
        Err(err) => {
            warn!(bytes = bytes.len(), error = %err, "Discarding MCP line that is not valid UTF-8");
        }
    }
}

pub const GENERIC_TOOL_ERROR: &str = "Tool execution failed";

/// Successful calls yield the `content` array as JSON; `isError` calls fail
/// with the first text item.
pub fn call_tool_outcome(result: CallToolResult) -> Result<Value, McpError> {
    if !result.is_error.unwrap_or(false) {
        return Ok(serde_json::to_value(&result.content)?);
    }
    let message = result
        .content
        .iter()
        .find_map(|block| match block {
            ContentBlock::TextContent(text) => Some(text.text.clone()),
            _ => None,
        })
        .unwrap_or_else(|| GENERIC_TOOL_ERROR.to_string());
    Err(McpError::ToolFailed(message))
}
