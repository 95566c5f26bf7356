//! Shared constants used across the application

/// Default per-request timeout for MCP calls.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default bound on spawning a server and completing `initialize`.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Bound on acquiring and writing to a server's stdin.
pub const STDIO_WRITE_TIMEOUT_SECS: u64 = 10;

/// How long a closing server gets to exit after stdin is shut before it is killed.
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

/// Upper bound on tools accepted from one server across all `tools/list` pages.
pub const MCP_MAX_TOOL_LIST: usize = 100;

pub const MCP_STARTUP_CONCURRENCY_LIMIT: usize = 3;

/// Tools considered read-only when plan mode is active and no list is configured.
pub const DEFAULT_READ_ONLY_TOOL_PATTERNS: &[&str] = &[
    "mcp__*__read*",
    "mcp__*__list*",
    "mcp__*__get*",
    "mcp__*__search*",
    "mcp__*__status",
];

pub const CLIENT_NAME: &str = "kestrel";
pub const CLIENT_TITLE: &str = "Kestrel MCP Bridge";
