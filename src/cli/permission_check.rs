use crate::core::config::data::Config;
use crate::mcp::permissions::{evaluate_permissions, PermissionChecker, PlanModeGate};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionVerdict {
    pub allowed_by_rules: bool,
    /// `None` when plan mode is off.
    pub allowed_by_plan: Option<bool>,
}

impl PermissionVerdict {
    pub fn allowed(&self) -> bool {
        self.allowed_by_rules && self.allowed_by_plan.unwrap_or(true)
    }
}

/// Server segment of `mcp__<server>__<tool>`.
pub fn server_of(tool_id: &str) -> Option<&str> {
    let rest = tool_id.strip_prefix("mcp__")?;
    let (server, _) = rest.split_once("__")?;
    Some(server).filter(|server| !server.is_empty())
}

/// Rules passed on the command line win; otherwise the named server's
/// configured rules apply.
pub fn evaluate(config: &Config, tool_id: &str, rules: &[String], plan: bool) -> PermissionVerdict {
    let allowed_by_rules = if rules.is_empty() {
        let configured = server_of(tool_id)
            .and_then(|server| config.find_server(server))
            .map(|server| server.permissions.as_slice())
            .unwrap_or_default();
        evaluate_permissions(tool_id, configured)
    } else {
        evaluate_permissions(tool_id, rules)
    };

    let allowed_by_plan =
        plan.then(|| PlanModeGate::new(config.read_only_patterns(), true).can_execute(tool_id));

    PermissionVerdict {
        allowed_by_rules,
        allowed_by_plan,
    }
}

pub fn check_permission(config: &Config, tool_id: &str, rules: &[String], plan: bool) -> bool {
    let verdict = evaluate(config, tool_id, rules, plan);
    let decision = if verdict.allowed() { "allowed" } else { "denied" };
    println!("{tool_id}: {decision}");
    if !verdict.allowed_by_rules {
        println!("  blocked by permission rules");
    }
    if verdict.allowed_by_plan == Some(false) {
        println!("  blocked by plan mode");
    }
    verdict.allowed()
}
