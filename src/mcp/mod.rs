//! Bridge between the local tool registry and external MCP servers.
//!
//! Each configured server runs as a child process speaking line-delimited
//! JSON-RPC over stdio. The [`registry::ConnectionRegistry`] owns one
//! [`client::ProtocolSession`] per server, and the [`bridge::ToolBridge`]
//! turns the tools those sessions advertise into namespaced entries in a
//! [`crate::tools::ToolRegistry`].

pub mod bridge;
pub mod client;
pub mod error;
pub mod events;
pub mod permissions;
pub mod protocol;
pub mod registry;

pub use error::McpError;

/// Public tool name: `mcp_<server>_<tool>`.
pub fn registry_tool_name(server_name: &str, tool_name: &str) -> String {
    format!("mcp_{server_name}_{tool_name}")
}

/// Name matched against permission rules: `mcp__<server>__<tool>`.
pub fn permission_tool_name(server_name: &str, tool_name: &str) -> String {
    format!("mcp__{server_name}__{tool_name}")
}
