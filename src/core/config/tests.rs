use super::data::{expand_env_vars_with, Config, McpServerConfig};
use super::io::ConfigError;
use std::collections::HashMap;
use std::time::Duration;
use tempfile::TempDir;

fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

#[test]
fn test_load_nonexistent_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nonexistent_config.toml");

    let config = Config::load_from_path(&config_path).expect("Failed to load config");

    assert!(config.mcp_servers.is_empty());
    assert_eq!(config.request_timeout(), Duration::from_secs(30));
    assert_eq!(config.handshake_timeout(), Duration::from_secs(30));
}

#[test]
fn loads_mcp_servers_from_toml() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        r#"
request_timeout_secs = 5
read_only_tools = ["mcp__*__read*"]

[[mcp_servers]]
name = "git"
command = "uvx"
args = ["mcp-server-git"]
env = { GIT_DIR = "/tmp/repo/.git" }
required_env_vars = ["HOME"]
permissions = ["mcp__git__*", "deny:mcp__git__push"]

[[mcp_servers]]
name = "disabled"
command = "true"
enabled = false
protocol_version = "2024-11-05"
"#,
    )
    .expect("write config");

    let config = Config::load_from_path(&config_path).expect("load config");

    assert_eq!(config.request_timeout(), Duration::from_secs(5));
    assert_eq!(config.handshake_timeout(), Duration::from_secs(30));
    assert_eq!(config.read_only_patterns(), vec!["mcp__*__read*"]);
    assert_eq!(config.mcp_servers.len(), 2);

    let git = config.find_server("git").expect("git server");
    assert_eq!(git.command, "uvx");
    assert_eq!(git.args, vec!["mcp-server-git"]);
    assert_eq!(git.env.get("GIT_DIR").map(String::as_str), Some("/tmp/repo/.git"));
    assert_eq!(git.permissions.len(), 2);
    assert!(git.is_enabled());

    let enabled: Vec<&str> = config
        .enabled_servers()
        .map(|server| server.name.as_str())
        .collect();
    assert_eq!(enabled, vec!["git"]);
    assert_eq!(
        config
            .find_server("disabled")
            .and_then(|server| server.protocol_version.as_deref()),
        Some("2024-11-05")
    );
}

#[test]
fn malformed_toml_reports_parse_error_with_path() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, "[[mcp_servers]\nname = ").expect("write config");

    let err = Config::load_from_path(&config_path).expect_err("parse should fail");
    assert!(matches!(err, ConfigError::Parse { ref path, .. } if path == &config_path));
    assert!(err.to_string().starts_with("Failed to parse config at"));
}

#[test]
fn duplicate_server_names_are_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        r#"
[[mcp_servers]]
name = "git"
command = "a"

[[mcp_servers]]
name = "git"
command = "b"
"#,
    )
    .expect("write config");

    let err = Config::load_from_path(&config_path).expect_err("duplicate should fail");
    match err {
        ConfigError::Invalid { message, .. } => {
            assert_eq!(message, "Duplicate MCP server name: git")
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn default_read_only_patterns_cover_reads_and_lists() {
    let patterns = Config::default().read_only_patterns();
    assert!(patterns.iter().any(|pattern| pattern == "mcp__*__read*"));
    assert!(patterns.iter().any(|pattern| pattern == "mcp__*__list*"));
}

#[test]
fn env_validation_counts_overrides_and_inherited_values() {
    let mut server = McpServerConfig::new("github", "github-mcp");
    server.required_env_vars = vec![
        "GITHUB_TOKEN".to_string(),
        "GITHUB_ORG".to_string(),
        "EMPTY_VAR".to_string(),
    ];
    server
        .env
        .insert("GITHUB_ORG".to_string(), "permacommons".to_string());

    let validation =
        server.validate_env_with(lookup_from(&[("GITHUB_TOKEN", "t0k3n"), ("EMPTY_VAR", "")]));

    assert_eq!(validation.present, vec!["GITHUB_TOKEN", "GITHUB_ORG"]);
    assert_eq!(validation.missing, vec!["EMPTY_VAR"]);
    assert!(!validation.is_satisfied());
}

#[test]
fn expands_braced_variables_and_keeps_unresolved_ones() {
    let lookup = lookup_from(&[("HOME", "/home/kes"), ("EMPTY", "")]);

    assert_eq!(
        expand_env_vars_with("${HOME}/src/.git", &lookup),
        "/home/kes/src/.git"
    );
    assert_eq!(
        expand_env_vars_with("${NOPE}-${HOME}", &lookup),
        "${NOPE}-/home/kes"
    );
    assert_eq!(expand_env_vars_with("a${EMPTY}b", &lookup), "ab");
    assert_eq!(expand_env_vars_with("$HOME ${HOME", &lookup), "$HOME ${HOME");
    assert_eq!(expand_env_vars_with("plain", &lookup), "plain");
}
