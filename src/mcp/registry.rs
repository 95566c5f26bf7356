use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use futures_util::{future, stream, StreamExt};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::core::config::data::McpServerConfig;
use crate::core::constants::MCP_STARTUP_CONCURRENCY_LIMIT;
use crate::mcp::client::{ProtocolSession, SessionOptions};
use crate::mcp::McpError;

pub type ConnectOutcome = (String, Result<Arc<ProtocolSession>, McpError>);

/// Owns at most one live [`ProtocolSession`] per server name.
///
/// There is no automatic reconnection: a session that dies stays in the map
/// (in a terminal state) until it is disconnected or connected again.
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<String, Arc<ProtocolSession>>>,
    connecting: StdMutex<HashSet<String>>,
    options: SessionOptions,
}

struct ConnectingGuard<'a> {
    connecting: &'a StdMutex<HashSet<String>>,
    name: String,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        let mut connecting = self
            .connecting
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        connecting.remove(&self.name);
    }
}

impl ConnectionRegistry {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            connecting: StdMutex::new(HashSet::new()),
            options,
        }
    }

    fn begin_connect(&self, name: &str) -> Result<ConnectingGuard<'_>, McpError> {
        let mut connecting = self
            .connecting
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !connecting.insert(name.to_string()) {
            return Err(McpError::AlreadyConnected(name.to_string()));
        }
        Ok(ConnectingGuard {
            connecting: &self.connecting,
            name: name.to_string(),
        })
    }

    /// Starts a session for `config`.
    ///
    /// Fails with `AlreadyConnected` while another connect for the same name
    /// is in flight or a live session exists. A dead session is replaced.
    pub async fn connect(
        &self,
        config: &McpServerConfig,
    ) -> Result<Arc<ProtocolSession>, McpError> {
        let _guard = self.begin_connect(&config.name)?;

        let stale = {
            let sessions = self.sessions.read().await;
            match sessions.get(&config.name) {
                Some(session) if !session.state().is_terminal() => {
                    return Err(McpError::AlreadyConnected(config.name.clone()));
                }
                Some(_) => true,
                None => false,
            }
        };
        if stale {
            debug!(server_id = %config.name, "Replacing terminated MCP session");
            if let Some(session) = self.sessions.write().await.remove(&config.name) {
                session.close().await;
            }
        }

        let session = Arc::new(ProtocolSession::connect(config, self.options.clone()).await?);
        self.sessions
            .write()
            .await
            .insert(config.name.clone(), session.clone());
        Ok(session)
    }

    /// Closes and forgets the session for `name`; a no-op when none exists.
    pub async fn disconnect(&self, name: &str) {
        let session = self.sessions.write().await.remove(name);
        match session {
            Some(session) => {
                session.close().await;
                info!(server_id = %name, "MCP server disconnected");
            }
            None => debug!(server_id = %name, "Disconnect requested for unknown MCP server"),
        }
    }

    pub async fn get_session(&self, name: &str) -> Option<Arc<ProtocolSession>> {
        self.sessions.read().await.get(name).cloned()
    }

    pub async fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Connects every enabled server, a few at a time.
    ///
    /// Failures are logged and returned alongside the successes; one bad
    /// server never stops the others.
    pub async fn connect_all<'a, I>(&self, configs: I) -> Vec<ConnectOutcome>
    where
        I: IntoIterator<Item = &'a McpServerConfig>,
    {
        let configs: Vec<&McpServerConfig> = configs
            .into_iter()
            .filter(|config| config.is_enabled())
            .collect();

        let outcomes: Vec<ConnectOutcome> = stream::iter(configs)
            .map(|config| async move { (config.name.clone(), self.connect(config).await) })
            .buffer_unordered(MCP_STARTUP_CONCURRENCY_LIMIT)
            .collect()
            .await;

        for (name, outcome) in &outcomes {
            if let Err(err) = outcome {
                warn!(server_id = %name, error = %err, "Failed to connect MCP server");
            }
        }
        outcomes
    }

    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<ProtocolSession>> = self
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();
        future::join_all(sessions.iter().map(|session| session.close())).await;
    }
}
