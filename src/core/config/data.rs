use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::constants::{
    DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_READ_ONLY_TOOL_PATTERNS, DEFAULT_REQUEST_TIMEOUT_SECS,
};

/// One external MCP server launched over stdio.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct McpServerConfig {
    /// Unique key; also the namespace segment of every tool the server exposes.
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides applied on top of the inherited environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Variables that must be set before the server is launched.
    #[serde(default)]
    pub required_env_vars: Vec<String>,
    /// Permission rules (`allow:` / `deny:` / bare patterns) scoped to this server.
    #[serde(default)]
    pub permissions: Vec<String>,
    pub enabled: Option<bool>,
    /// Overrides the protocol version requested during `initialize`.
    pub protocol_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvValidation {
    pub present: Vec<String>,
    pub missing: Vec<String>,
}

impl EnvValidation {
    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty()
    }
}

impl McpServerConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            required_env_vars: Vec::new(),
            permissions: Vec::new(),
            enabled: None,
            protocol_version: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Splits `required_env_vars` into present and missing.
    ///
    /// A variable is present when it is set to a non-empty value in the
    /// process environment or in this server's `env` overrides.
    pub fn validate_env(&self) -> EnvValidation {
        self.validate_env_with(|name| std::env::var(name).ok())
    }

    pub(crate) fn validate_env_with<F>(&self, lookup: F) -> EnvValidation
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut validation = EnvValidation::default();
        for name in &self.required_env_vars {
            let overridden = self.env.get(name).is_some_and(|value| !value.is_empty());
            let inherited = lookup(name).is_some_and(|value| !value.is_empty());
            if overridden || inherited {
                validation.present.push(name.clone());
            } else {
                validation.missing.push(name.clone());
            }
        }
        validation
    }

    /// Copy of this config with `${VAR}` references resolved in the command,
    /// arguments and environment values.
    pub fn expanded(&self) -> McpServerConfig {
        McpServerConfig {
            command: expand_env_vars(&self.command),
            args: self.args.iter().map(|arg| expand_env_vars(arg)).collect(),
            env: self
                .env
                .iter()
                .map(|(key, value)| (key.clone(), expand_env_vars(value)))
                .collect(),
            ..self.clone()
        }
    }
}

/// Replaces `${VAR}` with the value of `VAR` from the process environment.
///
/// Unresolved references and unterminated `${` sequences are kept verbatim.
pub fn expand_env_vars(input: &str) -> String {
    expand_env_vars_with(input, |name| std::env::var(name).ok())
}

pub(crate) fn expand_env_vars_with<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            result.push_str(&rest[start..]);
            return result;
        };
        let name = &after[..end];
        match lookup(name) {
            Some(value) => result.push_str(&value),
            None => result.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    result
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Per-request timeout for MCP calls, in seconds.
    pub request_timeout_secs: Option<u64>,
    /// Upper bound on spawn plus `initialize`, in seconds.
    pub handshake_timeout_secs: Option<u64>,
    /// Patterns allowed to run while plan mode is active.
    pub read_only_tools: Option<Vec<String>>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(
            self.handshake_timeout_secs
                .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
        )
    }

    pub fn read_only_patterns(&self) -> Vec<String> {
        match &self.read_only_tools {
            Some(patterns) => patterns.clone(),
            None => DEFAULT_READ_ONLY_TOOL_PATTERNS
                .iter()
                .map(|pattern| pattern.to_string())
                .collect(),
        }
    }

    pub fn enabled_servers(&self) -> impl Iterator<Item = &McpServerConfig> {
        self.mcp_servers.iter().filter(|server| server.is_enabled())
    }

    pub fn find_server(&self, name: &str) -> Option<&McpServerConfig> {
        self.mcp_servers.iter().find(|server| server.name == name)
    }

    /// Rejects duplicate or empty server names.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for server in &self.mcp_servers {
            let name = server.name.trim();
            if name.is_empty() {
                return Err("MCP server entries require a non-empty name".to_string());
            }
            if !seen.insert(name) {
                return Err(format!("Duplicate MCP server name: {name}"));
            }
        }
        Ok(())
    }
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
