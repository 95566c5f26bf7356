use crate::core::config::data::{Config, McpServerConfig};

fn server_row(server: &McpServerConfig) -> String {
    let enabled = if server.is_enabled() { "yes" } else { "no" };
    let env = server.validate_env();
    let env_status = if server.required_env_vars.is_empty() {
        "-".to_string()
    } else if env.is_satisfied() {
        "ok".to_string()
    } else {
        format!("missing {}", env.missing.join(", "))
    };
    let mut command = server.command.clone();
    for arg in &server.args {
        command.push(' ');
        command.push_str(arg);
    }
    format!("| {} | {} | {} | {} |", server.name, enabled, command, env_status)
}

pub fn format_servers(config: &Config) -> String {
    if config.mcp_servers.is_empty() {
        return "No MCP servers configured.".to_string();
    }

    let mut table = String::from("Configured MCP servers:\n\n");
    table.push_str("| Server | Enabled | Command | Environment |\n");
    table.push_str("|---|:---:|---|---|\n");
    for server in &config.mcp_servers {
        table.push_str(&server_row(server));
        table.push('\n');
    }
    table
}

pub fn list_servers(config: &Config) {
    print!("{}", format_servers(config));
    if config.mcp_servers.is_empty() {
        println!();
    }
}
