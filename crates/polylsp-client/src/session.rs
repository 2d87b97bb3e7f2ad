//! One language server's full protocol lifecycle.
//!
//! A [`ServerSession`] owns the subprocess, its transport, the negotiated
//! capability map, and the set of documents opened on it. State moves
//! `NotStarted → Starting → Running → ShuttingDown → Stopped`; a stopped
//! session may be started again, which re-runs the handshake and resets
//! the open-document set.
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::process::{Child, Command as TokioCommand};
use tokio::time::Duration;

use crate::error::LspError;
use crate::transport::Transport;
use crate::types::{client_capabilities, ServerConfig, ServerStatus, SessionState};

/// Default deadline for any single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for the shutdown request and process exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a `file://` URI for a local path. Relative paths are
/// absolutized against the current directory first; `file://foo.py` is
/// not a URI any server accepts.
pub fn file_uri(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", absolute.display())
}

/// A managed language server session.
pub struct ServerSession {
    config: ServerConfig,
    workspace_root: PathBuf,
    state: SessionState,
    transport: Option<Transport>,
    child: Option<Child>,
    capabilities: serde_json::Map<String, serde_json::Value>,
    open_documents: HashSet<String>,
}

impl ServerSession {
    /// Create a session in the `NotStarted` state.
    pub fn new(config: ServerConfig, workspace_root: PathBuf) -> Self {
        Self {
            config,
            workspace_root,
            state: SessionState::NotStarted,
            transport: None,
            child: None,
            capabilities: serde_json::Map::new(),
            open_documents: HashSet::new(),
        }
    }

    /// The configured server id.
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Coarse running/stopped status.
    pub fn status(&self) -> ServerStatus {
        if self.state == SessionState::Running {
            ServerStatus::Running
        } else {
            ServerStatus::Stopped
        }
    }

    /// The capability map from the last successful handshake. Empty
    /// unless the session is running.
    pub fn capabilities(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.capabilities
    }

    /// Whether the server advertised the named capability with a value
    /// that is neither absent, `null`, nor `false`. Never fails; returns
    /// false for a session that is not running.
    pub fn has_capability(&self, name: &str) -> bool {
        match self.capabilities.get(name) {
            None => false,
            Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Bool(b)) => *b,
            Some(_) => true,
        }
    }

    /// Spawn the subprocess and perform the initialize handshake.
    ///
    /// A safe no-op when already running. On any failure the session
    /// rolls back to `Stopped` with the subprocess reaped; callers must
    /// not assume a transport exists afterwards.
    pub async fn start(&mut self) -> Result<(), LspError> {
        if matches!(self.state, SessionState::Running | SessionState::Starting) {
            tracing::warn!(server = %self.config.id, "start requested but session already active");
            return Ok(());
        }

        self.state = SessionState::Starting;
        tracing::info!(
            server = %self.config.id,
            command = %self.config.command,
            "starting language server"
        );

        match self.spawn_and_initialize().await {
            Ok(caps) => {
                self.capabilities = caps;
                self.state = SessionState::Running;
                tracing::info!(server = %self.config.id, "language server running");
                Ok(())
            }
            Err(e) => {
                self.teardown().await;
                self.state = SessionState::Stopped;
                Err(match e {
                    already @ LspError::StartFailure { .. } => already,
                    other => LspError::StartFailure {
                        server: self.config.id.clone(),
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    async fn spawn_and_initialize(
        &mut self,
    ) -> Result<serde_json::Map<String, serde_json::Value>, LspError> {
        let mut child = TokioCommand::new(&self.config.command)
            .args(&self.config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| LspError::StartFailure {
                server: self.config.id.clone(),
                reason: format!("failed to spawn '{}': {}", self.config.command, e),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| LspError::StartFailure {
            server: self.config.id.clone(),
            reason: "could not capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| LspError::StartFailure {
            server: self.config.id.clone(),
            reason: "could not capture stdout".into(),
        })?;

        let transport = Transport::start(stdin, stdout);
        self.transport = Some(transport.clone());
        self.child = Some(child);

        // Handshake: initialize must complete before any other traffic.
        let params = serde_json::json!({
            "processId": std::process::id(),
            "rootUri": file_uri(&self.workspace_root),
            "capabilities": client_capabilities(),
            "clientInfo": {
                "name": "polylsp",
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        let result = transport
            .request("initialize", params, DEFAULT_REQUEST_TIMEOUT)
            .await?;

        let caps = match result.get("capabilities") {
            Some(serde_json::Value::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        };

        transport.notify("initialized", serde_json::json!({})).await?;
        Ok(caps)
    }

    /// Forward a request to the server and await its reply.
    ///
    /// Fails with [`LspError::NotStarted`] when the session is not
    /// running; never blocks or spawns in that case.
    pub async fn send_request(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, LspError> {
        let transport = self.transport_handle()?;
        transport
            .request(method, params, timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT))
            .await
    }

    /// Clone the transport handle for lock-free request issuance.
    pub fn transport_handle(&self) -> Result<Transport, LspError> {
        if self.state != SessionState::Running {
            return Err(LspError::NotStarted(self.config.id.clone()));
        }
        self.transport
            .clone()
            .ok_or_else(|| LspError::NotStarted(self.config.id.clone()))
    }

    /// Read the file and send `textDocument/didOpen` with version 1.
    ///
    /// Sent once per session lifetime per URI; subsequent calls for an
    /// already-open document are a no-op. The tracking set is cleared on
    /// stop, so a restarted session re-reads and re-opens.
    pub async fn open_document(&mut self, path: &Path, language_id: &str) -> Result<(), LspError> {
        let transport = self.transport_handle()?;

        let uri = file_uri(path);
        if self.open_documents.contains(&uri) {
            tracing::debug!(server = %self.config.id, %uri, "document already open");
            return Ok(());
        }

        let text = tokio::fs::read_to_string(path).await?;
        let params = serde_json::json!({
            "textDocument": {
                "uri": uri,
                "languageId": language_id,
                "version": 1,
                "text": text
            }
        });
        transport.notify("textDocument/didOpen", params).await?;
        self.open_documents.insert(uri);
        Ok(())
    }

    /// Shut the server down: `shutdown` request, `exit` notification,
    /// then reap the subprocess. Best-effort; errors along the way are
    /// logged, and the session always ends `Stopped` with capabilities
    /// and open-document tracking discarded. No-op if not running.
    pub async fn shutdown(&mut self) -> Result<(), LspError> {
        if self.state != SessionState::Running {
            return Ok(());
        }

        self.state = SessionState::ShuttingDown;
        tracing::info!(server = %self.config.id, "shutting down language server");

        if let Some(transport) = &self.transport {
            if let Err(e) = transport
                .request("shutdown", serde_json::Value::Null, SHUTDOWN_TIMEOUT)
                .await
            {
                tracing::warn!(server = %self.config.id, "shutdown request failed: {}", e);
            }
            if let Err(e) = transport.notify("exit", serde_json::Value::Null).await {
                tracing::warn!(server = %self.config.id, "exit notification failed: {}", e);
            }
        }

        self.teardown().await;
        self.state = SessionState::Stopped;
        Ok(())
    }

    /// Drop the transport, reap the subprocess, and discard per-run
    /// protocol state.
    async fn teardown(&mut self) {
        self.transport = None;
        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!(server = %self.config.id, "server did not exit, killing");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        }
        self.capabilities.clear();
        self.open_documents.clear();
    }

    #[cfg(test)]
    pub(crate) fn force_running(
        &mut self,
        capabilities: serde_json::Map<String, serde_json::Value>,
    ) {
        self.capabilities = capabilities;
        self.state = SessionState::Running;
    }

    #[cfg(test)]
    pub(crate) fn attach_transport(&mut self, transport: Transport) {
        self.transport = Some(transport);
    }

    #[cfg(test)]
    pub(crate) fn open_document_count(&self) -> usize {
        self.open_documents.len()
    }
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("id", &self.config.id)
            .field("state", &self.state)
            .field("capabilities", &self.capabilities.len())
            .field("open_documents", &self.open_documents.len())
            .finish()
    }
}
