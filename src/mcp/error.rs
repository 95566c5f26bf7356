use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use crate::mcp::client::SessionState;

/// Errors raised by the MCP bridge.
///
/// Connection errors end a connect attempt. Protocol errors end a single
/// call and are turned into structured tool results by the bridge.
#[derive(Debug)]
pub enum McpError {
    /// The server process could not be launched.
    Spawn {
        server: String,
        source: std::io::Error,
    },
    /// Required environment variables are unset.
    MissingEnv { server: String, vars: Vec<String> },
    /// `initialize` failed, timed out, or the process exited mid-handshake.
    Handshake { server: String, message: String },
    AlreadyConnected(String),
    NotConnected(String),
    NotReady { server: String, state: SessionState },
    UnknownServer(String),
    /// The server answered with a JSON-RPC error object.
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },
    Timeout { method: String, after: Duration },
    /// The session closed before a response arrived.
    ConnectionClosed { server: String },
    /// Tool arguments were not a JSON object; nothing was sent.
    InvalidArguments { tool: String, message: String },
    /// The tool ran and reported `isError`.
    ToolFailed(String),
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl McpError {
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            McpError::Spawn { .. }
                | McpError::MissingEnv { .. }
                | McpError::Handshake { .. }
                | McpError::AlreadyConnected(_)
        )
    }

    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            McpError::Rpc { .. }
                | McpError::Timeout { .. }
                | McpError::ConnectionClosed { .. }
                | McpError::InvalidArguments { .. }
                | McpError::ToolFailed(_)
                | McpError::Io(_)
                | McpError::Json(_)
        )
    }

    pub(crate) fn handshake(server: &str, message: impl Into<String>) -> Self {
        McpError::Handshake {
            server: server.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McpError::Spawn { server, source } => {
                write!(f, "Failed to start MCP server '{server}': {source}")
            }
            McpError::MissingEnv { server, vars } => write!(
                f,
                "MCP server '{server}' is missing required environment variables: {}",
                vars.join(", ")
            ),
            McpError::Handshake { server, message } => {
                write!(f, "MCP handshake with '{server}' failed: {message}")
            }
            McpError::AlreadyConnected(server) => {
                write!(f, "MCP server '{server}' is already connected")
            }
            McpError::NotConnected(server) => write!(f, "MCP server '{server}' is not connected"),
            McpError::NotReady { server, state } => {
                write!(f, "MCP server '{server}' is not ready (state: {state})")
            }
            McpError::UnknownServer(server) => write!(f, "Unknown MCP server: {server}"),
            McpError::Rpc {
                code,
                message,
                data,
            } => {
                write!(f, "MCP error {code}: {message}")?;
                match data.as_ref().and_then(rpc_details) {
                    Some(details) if !details.is_empty() => write!(f, "\n{details}"),
                    _ => Ok(()),
                }
            }
            McpError::Timeout { method, after } => write!(
                f,
                "MCP request '{method}' timed out after {}s",
                after.as_secs_f64()
            ),
            McpError::ConnectionClosed { server } => {
                write!(f, "Connection to MCP server '{server}' closed")
            }
            McpError::InvalidArguments { tool, message } => {
                write!(f, "Invalid arguments for MCP tool '{tool}': {message}")
            }
            McpError::ToolFailed(message) => f.write_str(message),
            McpError::Io(err) => write!(f, "MCP I/O error: {err}"),
            McpError::Json(err) => write!(f, "MCP JSON error: {err}"),
        }
    }
}

/// Servers put extra detail either in `data.details` or as a bare string.
fn rpc_details(data: &serde_json::Value) -> Option<&str> {
    data.get("details")
        .and_then(serde_json::Value::as_str)
        .or_else(|| data.as_str())
}

impl StdError for McpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            McpError::Spawn { source, .. } => Some(source),
            McpError::Io(err) => Some(err),
            McpError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for McpError {
    fn from(err: std::io::Error) -> Self {
        McpError::Io(err)
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        McpError::Json(err)
    }
}

impl From<rust_mcp_schema::RpcError> for McpError {
    fn from(err: rust_mcp_schema::RpcError) -> Self {
        McpError::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}
