use std::error::Error;

use serde_json::Value;

use crate::core::config::data::Config;
use crate::mcp::bridge::ServerToolCall;
use crate::mcp::McpError;

/// Parses `--args`; anything but a JSON object is rejected.
pub fn parse_arguments(raw: &str) -> Result<Value, String> {
    let value: Value =
        serde_json::from_str(raw).map_err(|err| format!("Invalid --args JSON: {err}"))?;
    if !value.is_object() {
        return Err("--args must be a JSON object".to_string());
    }
    Ok(value)
}

/// Runs one tool through its wrapper and prints the result as JSON.
///
/// Returns whether the call succeeded.
pub async fn call_tool(
    config: &Config,
    server_name: &str,
    tool: &str,
    raw_args: &str,
    plan: bool,
) -> Result<bool, Box<dyn Error>> {
    let arguments = parse_arguments(raw_args)?;
    let server = config
        .find_server(server_name)
        .ok_or_else(|| McpError::UnknownServer(server_name.to_string()))?;

    let bridge = super::build_bridge(config, plan);
    let outcome = async {
        bridge.connections().connect(server).await?;
        bridge.discover_and_register_tools(server).await?;
        let mut outcomes = bridge
            .execute_server_tools(
                server_name,
                vec![ServerToolCall {
                    tool: tool.to_string(),
                    arguments,
                }],
            )
            .await;
        Ok::<_, McpError>(outcomes.pop())
    }
    .await;
    bridge.connections().shutdown_all().await;

    let Some(outcome) = outcome? else {
        return Ok(false);
    };
    println!("{}", serde_json::to_string_pretty(&outcome.result)?);
    Ok(outcome.result.success)
}
