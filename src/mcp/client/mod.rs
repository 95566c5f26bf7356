//! One stdio MCP server process and its JSON-RPC session.
//!
//! A [`ProtocolSession`] walks `Idle → Spawning → Handshaking → Ready` on
//! connect and ends in `Closed` (orderly shutdown or EOF) or `Failed` (spawn
//! or handshake error). Requests are correlated by integer id through a
//! pending table; each one resolves exactly once, by response, timeout, or
//! session close.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rust_mcp_schema::{
    CallToolRequestParams, CallToolResult, ClientCapabilities, Implementation,
    InitializeRequestParams, InitializeResult, ListToolsResult, PaginatedRequestParams, Tool,
    LATEST_PROTOCOL_VERSION,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::data::{Config, McpServerConfig};
use crate::core::constants::{
    CLIENT_NAME, CLIENT_TITLE, DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
    MCP_MAX_TOOL_LIST, SHUTDOWN_GRACE_SECS,
};
use crate::mcp::events::McpServerNotification;
use crate::mcp::protocol::{
    call_tool_outcome, JsonRpcNotification, JsonRpcRequest, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use crate::mcp::McpError;

mod transport_stdio;

use transport_stdio::{
    build_command, spawn_stderr_drain, spawn_stdout_reader, PendingGuard, PendingTable,
    ReaderContext, SharedPending, StdioWriter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Spawning,
    Handshaking,
    Ready,
    Closed,
    Failed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Spawning => "spawning",
            SessionState::Handshaking => "handshaking",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub request_timeout: Duration,
    /// Bounds spawn plus `initialize`; process exit ends the wait early.
    pub handshake_timeout: Duration,
    pub notification_tx: Option<mpsc::UnboundedSender<McpServerNotification>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            notification_tx: None,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            handshake_timeout: config.handshake_timeout(),
            notification_tx: None,
        }
    }

    pub fn with_notifications(mut self, tx: mpsc::UnboundedSender<McpServerNotification>) -> Self {
        self.notification_tx = Some(tx);
        self
    }
}

pub struct ProtocolSession {
    server_id: String,
    writer: Arc<StdioWriter>,
    pending: SharedPending,
    next_request_id: AtomicU64,
    state: Arc<watch::Sender<SessionState>>,
    child: Mutex<Option<Child>>,
    shutdown: CancellationToken,
    tools: RwLock<Vec<Tool>>,
    server_details: OnceLock<InitializeResult>,
    request_timeout: Duration,
}

impl ProtocolSession {
    /// Spawns the server, completes the handshake and discovers its tools.
    ///
    /// The handshake races the `initialize` response against the output pipe
    /// closing, so a server that exits early fails fast instead of waiting
    /// out the handshake timeout.
    pub async fn connect(
        config: &McpServerConfig,
        options: SessionOptions,
    ) -> Result<ProtocolSession, McpError> {
        let session = Self::launch(config, &options)?;
        session.handshake(config, &options).await?;
        Ok(session)
    }

    /// Validates the environment, spawns the process and starts the reader.
    /// The session is left in `Spawning`.
    fn launch(
        config: &McpServerConfig,
        options: &SessionOptions,
    ) -> Result<ProtocolSession, McpError> {
        let server_id = config.name.clone();
        let env_status = config.validate_env();
        if !env_status.is_satisfied() {
            return Err(McpError::MissingEnv {
                server: server_id,
                vars: env_status.missing,
            });
        }

        let (state_tx, _) = watch::channel(SessionState::Idle);
        let state = Arc::new(state_tx);
        state.send_replace(SessionState::Spawning);

        let launch = config.expanded();
        debug!(
            server_id = %server_id,
            command = %launch.command,
            args = ?launch.args,
            "Starting MCP stdio server"
        );
        let mut child = build_command(&launch)
            .spawn()
            .map_err(|source| McpError::Spawn {
                server: server_id.clone(),
                source,
            })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            return Err(McpError::handshake(&server_id, "Unable to capture stdio pipes"));
        };

        let writer = Arc::new(StdioWriter::new(server_id.clone(), stdin));
        let pending: SharedPending = Arc::new(Mutex::new(PendingTable::default()));
        let shutdown = CancellationToken::new();

        spawn_stdout_reader(
            stdout,
            ReaderContext {
                server_id: server_id.clone(),
                pending: pending.clone(),
                writer: writer.clone(),
                state: state.clone(),
                notification_tx: options.notification_tx.clone(),
                shutdown: shutdown.clone(),
            },
        );
        spawn_stderr_drain(stderr, server_id.clone());

        Ok(ProtocolSession {
            server_id,
            writer,
            pending,
            next_request_id: AtomicU64::new(1),
            state,
            child: Mutex::new(Some(child)),
            shutdown,
            tools: RwLock::new(Vec::new()),
            server_details: OnceLock::new(),
            request_timeout: options.request_timeout,
        })
    }

    /// Runs `initialize`, `notifications/initialized` and the first
    /// `tools/list`, ending in `Ready` or `Failed`.
    async fn handshake(
        &self,
        config: &McpServerConfig,
        options: &SessionOptions,
    ) -> Result<(), McpError> {
        self.state.send_replace(SessionState::Handshaking);
        let requested_version = config
            .protocol_version
            .clone()
            .unwrap_or_else(|| LATEST_PROTOCOL_VERSION.to_string());

        let handshake = tokio::time::timeout(
            options.handshake_timeout,
            self.initialize(&requested_version, options.handshake_timeout),
        )
        .await
        .unwrap_or_else(|_| {
            Err(McpError::handshake(
                &self.server_id,
                format!(
                    "no initialize response within {}s",
                    options.handshake_timeout.as_secs_f64()
                ),
            ))
        });

        let handshake = match handshake {
            Ok(()) => self.list_tools().await.map(|_| ()),
            Err(err) => Err(err),
        };

        if let Err(err) = handshake {
            // Failed first: close() leaves terminal states alone.
            self.state.send_replace(SessionState::Failed);
            self.close().await;
            return Err(match err {
                McpError::Handshake { .. } => err,
                McpError::ConnectionClosed { .. } => McpError::handshake(
                    &self.server_id,
                    "server exited before completing the handshake",
                ),
                other => McpError::handshake(&self.server_id, other.to_string()),
            });
        }

        self.state.send_replace(SessionState::Ready);
        info!(
            server_id = %self.server_id,
            tools = self.tools.read().await.len(),
            "MCP server ready"
        );
        Ok(())
    }

    async fn initialize(&self, protocol_version: &str, timeout: Duration) -> Result<(), McpError> {
        let params = client_details(protocol_version);
        let result = self
            .send_request_with_timeout(METHOD_INITIALIZE, Some(params_value(&params)?), timeout)
            .await?;
        let details: InitializeResult = serde_json::from_value(result)
            .map_err(|err| McpError::handshake(&self.server_id, err.to_string()))?;
        if details.protocol_version.trim().is_empty() {
            return Err(McpError::handshake(
                &self.server_id,
                "initialize result is missing a protocol version",
            ));
        }
        if details.protocol_version != protocol_version {
            warn!(
                server_id = %self.server_id,
                requested = %protocol_version,
                negotiated = %details.protocol_version,
                "MCP server negotiated a different protocol version"
            );
        }
        let _ = self.server_details.set(details);

        self.notify(METHOD_INITIALIZED, None).await
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The server's `initialize` result, once the handshake got that far.
    pub fn server_details(&self) -> Option<&InitializeResult> {
        self.server_details.get()
    }

    /// Tools cached by the most recent `list_tools`.
    pub async fn tools(&self) -> Vec<Tool> {
        self.tools.read().await.clone()
    }

    pub async fn pending_requests(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        self.send_request_with_timeout(method, params, self.request_timeout)
            .await
    }

    /// Sends one request and waits for its response.
    ///
    /// The pending entry is removed on every exit path, including the caller
    /// dropping this future before it completes.
    pub async fn send_request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        if self.pending.lock().await.insert(request_id, tx).is_err() {
            return Err(McpError::ConnectionClosed {
                server: self.server_id.clone(),
            });
        }
        let _guard = PendingGuard::new(self.pending.clone(), request_id);

        debug!(server_id = %self.server_id, request_id, method = %method, "Sending MCP stdio request");
        let request = JsonRpcRequest::new(request_id, method, params);
        if let Err(err) = self.writer.write_message(&request).await {
            self.pending.lock().await.remove(request_id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::ConnectionClosed {
                server: self.server_id.clone(),
            }),
            Err(_) => {
                self.pending.lock().await.remove(request_id);
                warn!(
                    server_id = %self.server_id,
                    request_id,
                    method = %method,
                    timeout_secs = timeout.as_secs_f64(),
                    "MCP stdio request timed out"
                );
                Err(McpError::Timeout {
                    method: method.to_string(),
                    after: timeout,
                })
            }
        }
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        debug!(server_id = %self.server_id, method = %method, "Sending MCP stdio notification");
        self.writer
            .write_message(&JsonRpcNotification::new(method, params))
            .await
    }

    /// Fetches every `tools/list` page and replaces the cache.
    ///
    /// Paging stops at the tool cap, at an empty page, or when the server
    /// hands back a cursor it already gave us.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        let mut tools: Vec<Tool> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors: HashSet<String> = HashSet::new();

        loop {
            let params = cursor.take().map(|cursor| PaginatedRequestParams {
                cursor: Some(cursor),
                meta: None,
            });
            let params = params.as_ref().map(params_value).transpose()?;
            let result = self.send_request(METHOD_TOOLS_LIST, params).await?;
            let page: ListToolsResult = serde_json::from_value(result)?;
            let page_was_empty = page.tools.is_empty();
            tools.extend(page.tools);

            if tools.len() >= MCP_MAX_TOOL_LIST {
                if tools.len() > MCP_MAX_TOOL_LIST || page.next_cursor.is_some() {
                    warn!(
                        server_id = %self.server_id,
                        limit = MCP_MAX_TOOL_LIST,
                        "MCP server advertises more tools than the limit; truncating"
                    );
                }
                tools.truncate(MCP_MAX_TOOL_LIST);
                break;
            }
            let next = match page.next_cursor {
                Some(next) if !next.is_empty() => next,
                _ => break,
            };
            if page_was_empty {
                warn!(
                    server_id = %self.server_id,
                    cursor = %next,
                    "MCP tools/list returned an empty page with a cursor; stopping"
                );
                break;
            }
            if !seen_cursors.insert(next.clone()) {
                warn!(
                    server_id = %self.server_id,
                    cursor = %next,
                    "MCP tools/list repeated a cursor; stopping"
                );
                break;
            }
            cursor = Some(next);
        }

        debug!(server_id = %self.server_id, count = tools.len(), "Fetched MCP tool list");
        *self.tools.write().await = tools.clone();
        Ok(tools)
    }

    /// Calls a remote tool by its un-namespaced name.
    ///
    /// `arguments` must be a JSON object or null. `isError` results become
    /// [`McpError::ToolFailed`] carrying the first text content item.
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<Value, McpError> {
        let state = self.state();
        if state != SessionState::Ready {
            return Err(McpError::NotReady {
                server: self.server_id.clone(),
                state,
            });
        }

        let arguments = match arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(McpError::InvalidArguments {
                    tool: tool_name.to_string(),
                    message: format!("expected a JSON object, got {other}"),
                })
            }
        };
        let params = CallToolRequestParams::new(tool_name).with_arguments(arguments);
        let result = self
            .send_request(METHOD_TOOLS_CALL, Some(params_value(&params)?))
            .await?;
        let result: CallToolResult = serde_json::from_value(result)?;
        call_tool_outcome(result)
    }

    /// Shuts stdin, gives the server a grace period to exit, then kills it.
    ///
    /// Every pending request is rejected with `ConnectionClosed`. Safe to
    /// call more than once.
    pub async fn close(&self) {
        self.writer.shutdown().await;

        if let Some(mut child) = self.child.lock().await.take() {
            let grace = Duration::from_secs(SHUTDOWN_GRACE_SECS);
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(server_id = %self.server_id, status = %status, "MCP server exited");
                }
                Ok(Err(err)) => {
                    warn!(server_id = %self.server_id, error = %err, "Failed to wait for MCP server");
                }
                Err(_) => {
                    warn!(server_id = %self.server_id, "MCP server ignored shutdown; killing");
                    if let Err(err) = child.kill().await {
                        warn!(server_id = %self.server_id, error = %err, "Failed to kill MCP server");
                    }
                }
            }
        }

        self.shutdown.cancel();
        let rejected = self.pending.lock().await.close(&self.server_id);
        if rejected > 0 {
            debug!(server_id = %self.server_id, rejected, "Rejected pending MCP requests on close");
        }
        self.state.send_if_modified(|state| {
            if *state == SessionState::Failed || *state == SessionState::Closed {
                false
            } else {
                *state = SessionState::Closed;
                true
            }
        });
    }
}

impl Drop for ProtocolSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl fmt::Debug for ProtocolSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolSession")
            .field("server_id", &self.server_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn params_value<T: Serialize>(params: &T) -> Result<Value, McpError> {
    Ok(serde_json::to_value(params)?)
}

/// Server-initiated sampling and elicitation are answered with
/// method-not-found, so no client capability is advertised.
fn client_details(protocol_version: &str) -> InitializeRequestParams {
    InitializeRequestParams {
        capabilities: ClientCapabilities::default(),
        client_info: client_identity(),
        meta: None,
        protocol_version: protocol_version.to_string(),
    }
}

fn client_identity() -> Implementation {
    Implementation {
        name: CLIENT_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        title: Some(CLIENT_TITLE.to_string()),
        description: Some("Kestrel MCP client runtime".to_string()),
        icons: Vec::new(),
        website_url: None,
    }
}

#[cfg(test)]
mod tests;
