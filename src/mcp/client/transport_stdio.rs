use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use rust_mcp_schema::RequestId;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::SessionState;
use crate::core::config::data::McpServerConfig;
use crate::core::constants::STDIO_WRITE_TIMEOUT_SECS;
use crate::mcp::events::McpServerNotification;
use crate::mcp::protocol::{JsonRpcReply, LineBuffer, ServerMessage, METHOD_LOG_MESSAGE, METHOD_PING};
use crate::mcp::McpError;

const READ_CHUNK_SIZE: usize = 8 * 1024;

pub(crate) type Completion = oneshot::Sender<Result<Value, McpError>>;

/// Builds the launch command from an already expanded server config.
pub(crate) fn build_command(config: &McpServerConfig) -> Command {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .envs(&config.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Outstanding requests keyed by id.
///
/// Once closed, no entry can be added and every entry that was present has
/// been completed with `ConnectionClosed`.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<u64, Completion>,
    closed: bool,
}

pub(crate) type SharedPending = Arc<Mutex<PendingTable>>;

impl PendingTable {
    pub(crate) fn insert(&mut self, id: u64, completion: Completion) -> Result<(), Completion> {
        if self.closed {
            return Err(completion);
        }
        self.entries.insert(id, completion);
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: u64) -> Option<Completion> {
        self.entries.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn close(&mut self, server_id: &str) -> usize {
        self.closed = true;
        let drained = self.entries.len();
        for (_, completion) in self.entries.drain() {
            let _ = completion.send(Err(McpError::ConnectionClosed {
                server: server_id.to_string(),
            }));
        }
        drained
    }
}

/// Removes a request's pending entry when the awaiting future goes away.
///
/// Covers callers that drop or abort a request mid-flight; removing an id
/// the reader already completed is a no-op.
pub(crate) struct PendingGuard {
    pending: SharedPending,
    request_id: u64,
}

impl PendingGuard {
    pub(crate) fn new(pending: SharedPending, request_id: u64) -> Self {
        Self {
            pending,
            request_id,
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut table) = self.pending.try_lock() {
            table.remove(self.request_id);
            return;
        }
        let pending = self.pending.clone();
        let request_id = self.request_id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                pending.lock().await.remove(request_id);
            });
        }
    }
}

/// Serialized writes to the child's stdin.
pub(crate) struct StdioWriter {
    server_id: String,
    stdin: Mutex<Option<ChildStdin>>,
}

impl StdioWriter {
    pub(crate) fn new(server_id: String, stdin: ChildStdin) -> Self {
        Self {
            server_id,
            stdin: Mutex::new(Some(stdin)),
        }
    }

    pub(crate) async fn write_message<T: Serialize>(&self, message: &T) -> Result<(), McpError> {
        let mut payload = serde_json::to_vec(message)?;
        payload.push(b'\n');

        let write_timeout = Duration::from_secs(STDIO_WRITE_TIMEOUT_SECS);
        let mut guard = tokio::time::timeout(write_timeout, self.stdin.lock())
            .await
            .map_err(|_| timed_out("Timed out waiting for MCP stdio stdin lock"))?;
        let stdin = guard.as_mut().ok_or_else(|| McpError::ConnectionClosed {
            server: self.server_id.clone(),
        })?;

        debug!(server_id = %self.server_id, bytes = payload.len(), "Writing MCP stdio message");
        tokio::time::timeout(write_timeout, stdin.write_all(&payload))
            .await
            .map_err(|_| timed_out("Timed out writing MCP stdio message"))??;
        tokio::time::timeout(write_timeout, stdin.flush())
            .await
            .map_err(|_| timed_out("Timed out flushing MCP stdio message"))??;
        Ok(())
    }

    /// Closes stdin so the server sees EOF; later writes fail with
    /// `ConnectionClosed`.
    pub(crate) async fn shutdown(&self) {
        if let Some(mut stdin) = self.stdin.lock().await.take() {
            if let Err(err) = stdin.shutdown().await {
                debug!(server_id = %self.server_id, error = %err, "Failed to shut down MCP stdin");
            }
        }
    }
}

fn timed_out(message: &str) -> McpError {
    McpError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, message))
}

pub(crate) struct ReaderContext {
    pub server_id: String,
    pub pending: SharedPending,
    pub writer: Arc<StdioWriter>,
    pub state: Arc<watch::Sender<SessionState>>,
    pub notification_tx: Option<mpsc::UnboundedSender<McpServerNotification>>,
    pub shutdown: CancellationToken,
}

/// Reads stdout until EOF or cancellation, dispatching one message per line.
///
/// On exit every pending request is rejected and a `Ready` session becomes
/// `Closed`.
pub(crate) fn spawn_stdout_reader(mut stdout: ChildStdout, context: ReaderContext) {
    tokio::spawn(async move {
        let mut lines = LineBuffer::default();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        loop {
            let read = tokio::select! {
                _ = context.shutdown.cancelled() => break,
                read = stdout.read(&mut chunk) => read,
            };
            match read {
                Ok(0) => {
                    for line in lines.finish() {
                        dispatch_line(&context, &line).await;
                    }
                    break;
                }
                Ok(count) => {
                    for line in lines.push(&chunk[..count]) {
                        dispatch_line(&context, &line).await;
                    }
                }
                Err(err) => {
                    warn!(server_id = %context.server_id, error = %err, "MCP stdout read failed");
                    break;
                }
            }
        }

        let drained = context.pending.lock().await.close(&context.server_id);
        context.state.send_if_modified(|state| {
            if *state == SessionState::Ready {
                *state = SessionState::Closed;
                true
            } else {
                false
            }
        });
        debug!(
            server_id = %context.server_id,
            rejected_requests = drained,
            "MCP stdout reader finished"
        );
    });
}

pub(crate) fn spawn_stderr_drain(stderr: ChildStderr, server_id: String) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            if !line.trim().is_empty() {
                debug!(server_id = %server_id, "MCP stderr: {}", line);
            }
        }
    });
}

async fn dispatch_line(context: &ReaderContext, line: &str) {
    let message = match ServerMessage::from_line(line) {
        Ok(message) => message,
        Err(err) => {
            warn!(
                server_id = %context.server_id,
                error = %err,
                "Discarding unparseable MCP message"
            );
            return;
        }
    };

    match message {
        ServerMessage::Response { id, outcome } => {
            let Some(request_id) = correlation_id(&id) else {
                debug!(server_id = %context.server_id, response_id = ?id, "Ignoring response with foreign id");
                return;
            };
            let completion = context.pending.lock().await.remove(request_id);
            match completion {
                Some(completion) => {
                    debug!(server_id = %context.server_id, request_id, "Received MCP stdio response");
                    let _ = completion.send(outcome.map_err(McpError::from));
                }
                None => {
                    debug!(
                        server_id = %context.server_id,
                        request_id,
                        "Ignoring response for unknown or expired request"
                    );
                }
            }
        }
        ServerMessage::Request { id, method, .. } => {
            debug!(server_id = %context.server_id, method = %method, "Received MCP stdio request");
            let reply = if method == METHOD_PING {
                JsonRpcReply::result(id, serde_json::json!({}))
            } else {
                JsonRpcReply::method_not_found(id, &method)
            };
            let writer = context.writer.clone();
            let server_id = context.server_id.clone();
            tokio::spawn(async move {
                if let Err(err) = writer.write_message(&reply).await {
                    warn!(server_id = %server_id, error = %err, "Failed to answer MCP server request");
                }
            });
        }
        ServerMessage::Notification { method, params } => {
            if method == METHOD_LOG_MESSAGE {
                log_server_message(&context.server_id, params.as_ref());
            } else {
                debug!(server_id = %context.server_id, method = %method, "Received MCP stdio notification");
            }
            if let Some(tx) = context.notification_tx.as_ref() {
                let _ = tx.send(McpServerNotification {
                    server_id: context.server_id.clone(),
                    method,
                    params,
                });
            }
        }
    }
}

/// Our requests only ever carry non-negative integer ids.
fn correlation_id(id: &RequestId) -> Option<u64> {
    match id {
        RequestId::Integer(value) => u64::try_from(*value).ok(),
        RequestId::String(_) => None,
    }
}

fn log_server_message(server_id: &str, params: Option<&Value>) {
    let level = params
        .and_then(|params| params.get("level"))
        .and_then(Value::as_str)
        .unwrap_or("info");
    let data = params
        .and_then(|params| params.get("data"))
        .map(|data| match data {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default();

    match level {
        "debug" => debug!(server_id = %server_id, "MCP server log: {}", data),
        "info" | "notice" => info!(server_id = %server_id, "MCP server log: {}", data),
        "warning" => warn!(server_id = %server_id, "MCP server log: {}", data),
        _ => error!(server_id = %server_id, level = %level, "MCP server log: {}", data),
    }
}
