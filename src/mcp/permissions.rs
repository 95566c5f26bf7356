//! Wildcard permission rules for namespaced MCP tools.
//!
//! Rules are plain strings matched against the permission form of a tool id,
//! `mcp__<server>__<tool>`. A rule may carry an `allow:` or `deny:` prefix;
//! unprefixed rules allow. Deny always wins, and as soon as one allow rule is
//! present the allow rules act as an allow-list.

use std::sync::atomic::{AtomicBool, Ordering};

use regex::Regex;
use tracing::debug;

const ALLOW_PREFIX: &str = "allow:";
const DENY_PREFIX: &str = "deny:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRule {
    pub pattern: String,
    pub allowed: bool,
}

/// Returns true when `tool_id` matches `pattern` in full.
///
/// `*` matches any run of characters (including none); everything else is
/// literal and compared case-sensitively.
pub fn match_wildcard_permission(tool_id: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return tool_id == pattern;
    }

    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    match Regex::new(&format!("(?s)^{body}$")) {
        Ok(regex) => regex.is_match(tool_id),
        Err(err) => {
            debug!(pattern = %pattern, error = %err, "Ignoring unusable permission pattern");
            false
        }
    }
}

pub fn parse_permission_rule(rule: &str) -> PermissionRule {
    if let Some(pattern) = rule.strip_prefix(ALLOW_PREFIX) {
        PermissionRule {
            pattern: pattern.to_string(),
            allowed: true,
        }
    } else if let Some(pattern) = rule.strip_prefix(DENY_PREFIX) {
        PermissionRule {
            pattern: pattern.to_string(),
            allowed: false,
        }
    } else {
        PermissionRule {
            pattern: rule.to_string(),
            allowed: true,
        }
    }
}

/// Decides whether `tool_id` may run under `rules`.
///
/// An empty rule list allows everything.
pub fn evaluate_permissions<S: AsRef<str>>(tool_id: &str, rules: &[S]) -> bool {
    if rules.is_empty() {
        return true;
    }

    let parsed: Vec<PermissionRule> = rules
        .iter()
        .map(|rule| parse_permission_rule(rule.as_ref()))
        .collect();

    let denied = parsed
        .iter()
        .filter(|rule| !rule.allowed)
        .any(|rule| match_wildcard_permission(tool_id, &rule.pattern));
    if denied {
        return false;
    }

    let mut allow_rules = parsed.iter().filter(|rule| rule.allowed).peekable();
    if allow_rules.peek().is_none() {
        return true;
    }
    allow_rules.any(|rule| match_wildcard_permission(tool_id, &rule.pattern))
}

pub fn is_tool_allowed<S: AsRef<str>>(server_name: &str, tool_name: &str, rules: &[S]) -> bool {
    evaluate_permissions(&super::permission_tool_name(server_name, tool_name), rules)
}

pub fn filter_allowed_tools<S: AsRef<str>>(
    server_name: &str,
    tool_names: &[String],
    rules: &[S],
) -> Vec<String> {
    tool_names
        .iter()
        .filter(|tool| is_tool_allowed(server_name, tool, rules))
        .cloned()
        .collect()
}

/// Host-side policy consulted before any MCP tool call leaves the process.
///
/// Receives the permission form of the tool id (`mcp__<server>__<tool>`).
pub trait PermissionChecker: Send + Sync {
    fn can_execute(&self, tool_id: &str) -> bool;
}

/// Applies a fixed list of permission rule strings.
#[derive(Debug, Clone, Default)]
pub struct RulePermissionChecker {
    rules: Vec<String>,
}

impl RulePermissionChecker {
    pub fn new(rules: Vec<String>) -> Self {
        Self { rules }
    }
}

impl PermissionChecker for RulePermissionChecker {
    fn can_execute(&self, tool_id: &str) -> bool {
        evaluate_permissions(tool_id, &self.rules)
    }
}

/// Read-only plan mode.
///
/// While active only tools matching one of the read-only patterns may run;
/// when inactive every call passes through.
#[derive(Debug)]
pub struct PlanModeGate {
    active: AtomicBool,
    read_only_patterns: Vec<String>,
}

impl PlanModeGate {
    pub fn new(read_only_patterns: Vec<String>, active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
            read_only_patterns,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }
}

impl PermissionChecker for PlanModeGate {
    fn can_execute(&self, tool_id: &str) -> bool {
        if !self.is_active() {
            return true;
        }
        self.read_only_patterns
            .iter()
            .any(|pattern| match_wildcard_permission(tool_id, pattern))
    }
}
