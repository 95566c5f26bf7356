//! Discovery and registration of MCP tools in the host tool registry.
//!
//! Every remote tool `t` on server `s` becomes a [`McpToolWrapper`] named
//! `mcp_s_t`. The bridge remembers which names it registered per server so
//! they can be removed together, and serializes register/unregister work for
//! one server behind a per-server lock.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex};

use rust_mcp_schema::Tool as RemoteTool;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::config::data::McpServerConfig;
use crate::mcp::permissions::PermissionChecker;
use crate::mcp::registry::ConnectionRegistry;
use crate::mcp::{registry_tool_name, McpError};
use crate::tools::{ToolRegistry, ToolResult};

pub mod schema;
mod wrapper;

pub use wrapper::McpToolWrapper;

#[derive(Default)]
struct ServerTools {
    registered: BTreeSet<String>,
    cached: Vec<RemoteTool>,
}

/// One call in an [`ToolBridge::execute_server_tools`] batch.
#[derive(Debug, Clone)]
pub struct ServerToolCall {
    /// Remote (un-namespaced) tool name.
    pub tool: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerToolOutcome {
    pub tool: String,
    pub result: ToolResult,
}

pub struct ToolBridge {
    tool_registry: Arc<ToolRegistry>,
    connections: Arc<ConnectionRegistry>,
    permission_checker: Option<Arc<dyn PermissionChecker>>,
    servers: StdMutex<HashMap<String, Arc<Mutex<ServerTools>>>>,
}

impl ToolBridge {
    pub fn new(
        tool_registry: Arc<ToolRegistry>,
        connections: Arc<ConnectionRegistry>,
        permission_checker: Option<Arc<dyn PermissionChecker>>,
    ) -> Self {
        Self {
            tool_registry,
            connections,
            permission_checker,
            servers: StdMutex::new(HashMap::new()),
        }
    }

    pub fn tool_registry(&self) -> &Arc<ToolRegistry> {
        &self.tool_registry
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    fn server_entry(&self, server_name: &str) -> Arc<Mutex<ServerTools>> {
        let mut servers = self
            .servers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        servers.entry(server_name.to_string()).or_default().clone()
    }

    fn existing_entry(&self, server_name: &str) -> Option<Arc<Mutex<ServerTools>>> {
        let servers = self
            .servers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        servers.get(server_name).cloned()
    }

    /// Servers this bridge holds registration state for.
    pub fn tracked_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .known_servers()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();
        names
    }

    fn known_servers(&self) -> Vec<(String, Arc<Mutex<ServerTools>>)> {
        let servers = self
            .servers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        servers
            .iter()
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect()
    }

    /// Fetches the server's tools and registers a wrapper for each new one.
    ///
    /// Returns the public names registered by this call; tools already
    /// registered for the server are skipped, so repeating the call is safe.
    /// A name taken by someone else in the registry is logged and skipped.
    pub async fn discover_and_register_tools(
        &self,
        config: &McpServerConfig,
    ) -> Result<Vec<String>, McpError> {
        let server_name = config.name.as_str();
        let session = self
            .connections
            .get_session(server_name)
            .await
            .ok_or_else(|| McpError::NotConnected(server_name.to_string()))?;
        let state = session.state();
        if !session.is_ready() {
            return Err(McpError::NotReady {
                server: server_name.to_string(),
                state,
            });
        }

        let entry = self.server_entry(server_name);
        let mut tools = entry.lock().await;
        let descriptors = session.list_tools().await?;
        let rules: Arc<[String]> = config.permissions.clone().into();

        let mut added = Vec::new();
        for descriptor in &descriptors {
            let public_name = registry_tool_name(server_name, &descriptor.name);
            if tools.registered.contains(&public_name) {
                continue;
            }
            let wrapper = McpToolWrapper::new(
                server_name,
                descriptor,
                rules.clone(),
                self.connections.clone(),
                self.permission_checker.clone(),
            );
            match self.tool_registry.register(Arc::new(wrapper)).await {
                Ok(()) => {
                    tools.registered.insert(public_name.clone());
                    added.push(public_name);
                }
                Err(err) => {
                    warn!(server_id = %server_name, tool = %descriptor.name, error = %err, "Skipping MCP tool registration");
                }
            }
        }
        tools.cached = descriptors;

        info!(
            server_id = %server_name,
            added = added.len(),
            total = tools.registered.len(),
            "Registered MCP tools"
        );
        Ok(added)
    }

    /// Removes every wrapper registered for `server_name` and drops its cache.
    pub async fn unregister_server_tools(&self, server_name: &str) {
        let Some(entry) = self.existing_entry(server_name) else {
            debug!(server_id = %server_name, "No MCP tools registered for server");
            return;
        };
        let mut tools = entry.lock().await;
        for public_name in std::mem::take(&mut tools.registered) {
            if let Err(err) = self.tool_registry.unregister(&public_name).await {
                warn!(server_id = %server_name, tool = %public_name, error = %err, "Failed to unregister MCP tool");
            }
        }
        tools.cached.clear();
        debug!(server_id = %server_name, "Unregistered MCP tools");
    }

    /// Public tool names per server, as registered by this bridge.
    pub async fn get_all_registered_tools(&self) -> BTreeMap<String, Vec<String>> {
        let mut all = BTreeMap::new();
        for (server_name, entry) in self.known_servers() {
            let tools = entry.lock().await;
            if !tools.registered.is_empty() {
                all.insert(server_name, tools.registered.iter().cloned().collect());
            }
        }
        all
    }

    /// Descriptors from the last discovery for `server_name`.
    pub async fn cached_tools(&self, server_name: &str) -> Vec<RemoteTool> {
        match self.existing_entry(server_name) {
            Some(entry) => entry.lock().await.cached.clone(),
            None => Vec::new(),
        }
    }

    /// Runs each call through its registered wrapper, one after another.
    ///
    /// Every call yields an outcome; a failure never stops the batch.
    pub async fn execute_server_tools(
        &self,
        server_name: &str,
        calls: Vec<ServerToolCall>,
    ) -> Vec<ServerToolOutcome> {
        let mut outcomes = Vec::with_capacity(calls.len());
        for call in calls {
            let public_name = registry_tool_name(server_name, &call.tool);
            let result = match self.tool_registry.get_tool(&public_name).await {
                Some(tool) => tool.execute(call.arguments).await,
                None => ToolResult::failure(format!("Tool '{public_name}' is not registered")),
            };
            outcomes.push(ServerToolOutcome {
                tool: call.tool,
                result,
            });
        }
        outcomes
    }
}
