use std::error::Error;

use crate::core::config::data::{Config, McpServerConfig};
use crate::mcp::bridge::ToolBridge;
use crate::mcp::McpError;
use crate::tools::Tool;

/// One block per tool: name, description, then one line per parameter.
pub fn format_tool(tool: &dyn Tool) -> String {
    let mut out = format!("{}\n  {}\n", tool.name(), tool.description());
    for param in tool.parameters() {
        let marker = if param.required { " (required)" } else { "" };
        out.push_str(&format!("    - {}: {}{}", param.name, param.kind, marker));
        if !param.description.is_empty() {
            out.push_str(&format!(" {}", param.description));
        }
        out.push('\n');
    }
    out
}

async fn connect_and_discover(bridge: &ToolBridge, server: &McpServerConfig) {
    if let Err(err) = bridge.connections().connect(server).await {
        eprintln!("{}: {err}", server.name);
        return;
    }
    if let Err(err) = bridge.discover_and_register_tools(server).await {
        eprintln!("{}: {err}", server.name);
    }
}

pub async fn list_tools(
    config: &Config,
    server_name: Option<&str>,
    plan: bool,
) -> Result<(), Box<dyn Error>> {
    let servers: Vec<&McpServerConfig> = match server_name {
        Some(name) => vec![config
            .find_server(name)
            .ok_or_else(|| McpError::UnknownServer(name.to_string()))?],
        None => config.enabled_servers().collect(),
    };
    if servers.is_empty() {
        println!("No MCP servers configured.");
        return Ok(());
    }

    let bridge = super::build_bridge(config, plan);
    for server in &servers {
        connect_and_discover(&bridge, server).await;
    }

    let registry = bridge.tool_registry();
    for (server, names) in bridge.get_all_registered_tools().await {
        println!("[{server}]");
        for name in names {
            if let Some(tool) = registry.get_tool(&name).await {
                print!("{}", format_tool(tool.as_ref()));
            }
        }
        println!();
    }

    bridge.connections().shutdown_all().await;
    Ok(())
}
