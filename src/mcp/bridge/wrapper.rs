use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_schema::{Tool as RemoteTool, ToolInputSchema};
use serde_json::Value;
use tracing::{debug, info};

use super::schema::convert_parameters;
use crate::mcp::permissions::{evaluate_permissions, PermissionChecker};
use crate::mcp::registry::ConnectionRegistry;
use crate::mcp::{permission_tool_name, registry_tool_name, McpError};
use crate::tools::{Tool, ToolParameter, ToolResult};

/// A remote MCP tool exposed through the host [`Tool`] trait.
///
/// Execution checks the server's own rules, then the host checker, and only
/// then forwards the call to whichever session currently serves the server.
pub struct McpToolWrapper {
    public_name: String,
    permission_name: String,
    server_name: String,
    remote_name: String,
    description: String,
    parameters: Vec<ToolParameter>,
    input_schema: ToolInputSchema,
    server_rules: Arc<[String]>,
    connections: Arc<ConnectionRegistry>,
    permission_checker: Option<Arc<dyn PermissionChecker>>,
}

impl McpToolWrapper {
    pub(crate) fn new(
        server_name: &str,
        descriptor: &RemoteTool,
        server_rules: Arc<[String]>,
        connections: Arc<ConnectionRegistry>,
        permission_checker: Option<Arc<dyn PermissionChecker>>,
    ) -> Self {
        let description = descriptor
            .description
            .clone()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| format!("MCP tool '{}' from {}", descriptor.name, server_name));
        Self {
            public_name: registry_tool_name(server_name, &descriptor.name),
            permission_name: permission_tool_name(server_name, &descriptor.name),
            server_name: server_name.to_string(),
            remote_name: descriptor.name.clone(),
            description,
            parameters: convert_parameters(&descriptor.input_schema),
            input_schema: descriptor.input_schema.clone(),
            server_rules,
            connections,
            permission_checker,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    pub fn permission_name(&self) -> &str {
        &self.permission_name
    }

    /// The schema the server advertised, before flattening.
    pub fn input_schema(&self) -> &ToolInputSchema {
        &self.input_schema
    }

    fn denial(&self, source: &str) -> ToolResult {
        info!(
            server_id = %self.server_name,
            tool = %self.remote_name,
            source,
            "MCP tool call denied"
        );
        ToolResult::failure(format!(
            "Permission denied: {} is not allowed by {source}",
            self.permission_name
        ))
    }
}

#[async_trait]
impl Tool for McpToolWrapper {
    fn name(&self) -> &str {
        &self.public_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &[ToolParameter] {
        &self.parameters
    }

    async fn execute(&self, args: Value) -> ToolResult {
        if !evaluate_permissions(&self.permission_name, &self.server_rules[..]) {
            return self.denial("server permission rules");
        }
        if let Some(checker) = self.permission_checker.as_ref() {
            if !checker.can_execute(&self.permission_name) {
                return self.denial("the active permission policy");
            }
        }

        let Some(session) = self.connections.get_session(&self.server_name).await else {
            return ToolResult::failure(
                McpError::NotConnected(self.server_name.clone()).to_string(),
            );
        };

        match session.call_tool(&self.remote_name, args).await {
            Ok(content) => ToolResult::ok(content),
            Err(err) => {
                debug!(
                    server_id = %self.server_name,
                    tool = %self.remote_name,
                    error = %err,
                    "MCP tool call failed"
                );
                ToolResult::failure(err.to_string())
            }
        }
    }
}
