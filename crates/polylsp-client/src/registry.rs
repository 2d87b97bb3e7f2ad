//! Registry owning the configured servers and routing tables.
//!
//! Routing tables are built once from the ordered config list and are
//! read-only afterwards. When two configs claim the same extension or
//! language, the later entry wins. Sessions are created lazily on first
//! resolution and discarded by `shutdown_all`; configured servers stay
//! resolvable afterwards, with a later resolution creating a fresh
//! session. Resolution never starts a session; starting is the caller's
//! explicit responsibility.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::LspError;
use crate::session::ServerSession;
use crate::types::{ServerConfig, ServerReport, ServerStatus, ServerSummary};

/// A session shared behind a per-session lock. The lock serializes all
/// state and transport mutation, so two concurrent starts cannot
/// double-spawn.
pub type SharedSession = Arc<Mutex<ServerSession>>;

/// Holds the configured servers, their live sessions, and routing.
pub struct ServerRegistry {
    configs: HashMap<String, ServerConfig>,
    /// Config order, for deterministic listing.
    order: Vec<String>,
    /// extension (without leading dot) → server id.
    extension_map: HashMap<String, String>,
    /// language id → server id.
    language_map: HashMap<String, String>,
    workspace_root: PathBuf,
    /// Live sessions. An entry appears on first resolution and is
    /// removed by `shutdown_all`.
    sessions: Mutex<HashMap<String, SharedSession>>,
}

impl ServerRegistry {
    /// Build the registry and routing tables from an ordered config
    /// list. Later entries override earlier ones for an overlapping
    /// extension or language.
    pub fn new(configs: Vec<ServerConfig>, workspace_root: PathBuf) -> Self {
        let mut config_map = HashMap::new();
        let mut order = Vec::new();
        let mut extension_map = HashMap::new();
        let mut language_map = HashMap::new();

        for config in configs {
            for ext in &config.extensions {
                let key = ext.trim_start_matches('.').to_string();
                extension_map.insert(key, config.id.clone());
            }
            for lang in &config.languages {
                language_map.insert(lang.clone(), config.id.clone());
            }
            if !config_map.contains_key(&config.id) {
                order.push(config.id.clone());
            }
            config_map.insert(config.id.clone(), config);
        }

        Self {
            configs: config_map,
            order,
            extension_map,
            language_map,
            workspace_root,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Number of configured servers.
    pub fn server_count(&self) -> usize {
        self.configs.len()
    }

    /// Resolve a session by its configured id, creating it in the
    /// `NotStarted` state if none is live.
    pub async fn resolve_by_id(&self, id: &str) -> Result<SharedSession, LspError> {
        let config = self
            .configs
            .get(id)
            .ok_or_else(|| LspError::UnknownServer(format!("id '{}'", id)))?;
        let mut sessions = self.sessions.lock().await;
        let session = sessions.entry(id.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(ServerSession::new(
                config.clone(),
                self.workspace_root.clone(),
            )))
        });
        Ok(session.clone())
    }

    /// Resolve a session by a file path's extension.
    pub async fn resolve_by_extension(&self, path: &Path) -> Result<SharedSession, LspError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| {
                LspError::UnknownServer(format!("path '{}' (no extension)", path.display()))
            })?;
        let id = self
            .extension_map
            .get(ext)
            .ok_or_else(|| LspError::UnknownServer(format!("extension '.{}'", ext)))?;
        self.resolve_by_id(id).await
    }

    /// Resolve a session by language id.
    pub async fn resolve_by_language(&self, language_id: &str) -> Result<SharedSession, LspError> {
        let id = self
            .language_map
            .get(language_id)
            .ok_or_else(|| LspError::UnknownServer(format!("language '{}'", language_id)))?;
        self.resolve_by_id(id).await
    }

    /// Start one session by id. A warning-level no-op when already
    /// running; fails with [`LspError::UnknownServer`] for an
    /// unconfigured id.
    pub async fn start_one(&self, id: &str) -> Result<(), LspError> {
        let session = self.resolve_by_id(id).await?;
        let mut session = session.lock().await;
        session.start().await
    }

    /// Start every configured session. A failure in one does not
    /// prevent the others from being attempted; failures are collected
    /// into an aggregate error naming each failed session.
    pub async fn start_all(&self) -> Result<(), LspError> {
        let total = self.order.len();
        let mut failures = Vec::new();

        for id in &self.order {
            if let Err(e) = self.start_one(id).await {
                tracing::error!(server = %id, "startup failed: {}", e);
                failures.push(format!("{}: {}", id, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(LspError::StartAll {
                failed: failures.len(),
                total,
                details: failures.join("; "),
            })
        }
    }

    /// Shut down and discard every tracked session. Per-session
    /// shutdown is best-effort, so one erroring server never blocks the
    /// rest. The tracked set ends empty; configured servers remain
    /// resolvable, and a later resolution creates a fresh session.
    /// Idempotent.
    pub async fn shutdown_all(&self) {
        let drained: Vec<(String, SharedSession)> = {
            let mut sessions = self.sessions.lock().await;
            self.order
                .iter()
                .filter_map(|id| sessions.remove(id).map(|s| (id.clone(), s)))
                .collect()
        };

        for (id, session) in drained {
            let mut session = session.lock().await;
            if let Err(e) = session.shutdown().await {
                tracing::warn!(server = %id, "shutdown failed: {}", e);
            }
        }
    }

    /// How many sessions are currently tracked (live, running or not).
    pub async fn tracked_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// How many sessions are currently running.
    pub async fn running_count(&self) -> usize {
        let sessions: Vec<SharedSession> =
            self.sessions.lock().await.values().cloned().collect();
        let mut count = 0;
        for session in sessions {
            if session.lock().await.status() == ServerStatus::Running {
                count += 1;
            }
        }
        count
    }

    /// Per-server summaries in configuration order.
    pub async fn list(&self) -> Vec<ServerSummary> {
        let mut summaries = Vec::with_capacity(self.order.len());
        for id in &self.order {
            if let Some(config) = self.configs.get(id) {
                summaries.push(ServerSummary {
                    id: config.id.clone(),
                    command: config.command.clone(),
                    languages: config.languages.clone(),
                    extensions: config.extensions.clone(),
                    status: self.status_of(id).await,
                });
            }
        }
        summaries
    }

    /// Detailed report for one server: config, status, and (while
    /// running) the advertised capabilities.
    pub async fn describe(&self, id: &str) -> Result<ServerReport, LspError> {
        let config = self
            .configs
            .get(id)
            .ok_or_else(|| LspError::UnknownServer(format!("id '{}'", id)))?;

        let session = self.sessions.lock().await.get(id).cloned();
        let (status, capabilities) = match session {
            Some(session) => {
                let session = session.lock().await;
                let status = session.status();
                let capabilities = if status == ServerStatus::Running {
                    Some(session.capabilities().clone())
                } else {
                    None
                };
                (status, capabilities)
            }
            None => (ServerStatus::Stopped, None),
        };

        Ok(ServerReport {
            config: config.clone(),
            status,
            capabilities,
        })
    }

    async fn status_of(&self, id: &str) -> ServerStatus {
        let session = self.sessions.lock().await.get(id).cloned();
        match session {
            Some(session) => session.lock().await.status(),
            None => ServerStatus::Stopped,
        }
    }
}

impl std::fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("server_count", &self.configs.len())
            .field("extensions", &self.extension_map.len())
            .field("languages", &self.language_map.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use crate::types::SessionState;

    fn config(id: &str, extensions: &[&str], languages: &[&str]) -> ServerConfig {
        ServerConfig {
            id: id.into(),
            command: id.into(),
            args: vec![],
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
            languages: languages.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn registry(configs: Vec<ServerConfig>) -> ServerRegistry {
        ServerRegistry::new(configs, PathBuf::from("/tmp"))
    }

    #[tokio::test]
    async fn empty_registry() {
        let reg = registry(vec![]);
        assert_eq!(reg.server_count(), 0);
        assert!(reg.resolve_by_id("pylsp").await.is_err());
    }

    #[tokio::test]
    async fn resolve_by_path_and_language_hit_same_session() {
        let reg = registry(vec![config("pylsp", &[".py"], &["python"])]);

        let by_ext = reg.resolve_by_extension(Path::new("foo.py")).await.unwrap();
        let by_lang = reg.resolve_by_language("python").await.unwrap();
        assert_eq!(by_ext.lock().await.id(), "pylsp");
        assert_eq!(by_lang.lock().await.id(), "pylsp");
        assert!(Arc::ptr_eq(&by_ext, &by_lang));
    }

    #[tokio::test]
    async fn later_config_wins_overlapping_extension() {
        let reg = registry(vec![
            config("pylsp", &[".py"], &["python"]),
            config("pyright", &[".py"], &["python"]),
        ]);

        let session = reg.resolve_by_extension(Path::new("foo.py")).await.unwrap();
        assert_eq!(session.lock().await.id(), "pyright");
        let session = reg.resolve_by_language("python").await.unwrap();
        assert_eq!(session.lock().await.id(), "pyright");
    }

    #[tokio::test]
    async fn extension_keys_tolerate_missing_dot() {
        let reg = registry(vec![config("gopls", &["go"], &["go"])]);
        assert!(reg.resolve_by_extension(Path::new("main.go")).await.is_ok());
    }

    #[tokio::test]
    async fn resolve_unknown_extension_fails() {
        let reg = registry(vec![config("pylsp", &[".py"], &["python"])]);
        let err = reg
            .resolve_by_extension(Path::new("foo.zig"))
            .await
            .unwrap_err();
        match err {
            LspError::UnknownServer(what) => assert!(what.contains(".zig")),
            other => panic!("expected UnknownServer, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn resolve_path_without_extension_fails() {
        let reg = registry(vec![config("pylsp", &[".py"], &["python"])]);
        assert!(reg.resolve_by_extension(Path::new("Makefile")).await.is_err());
    }

    #[tokio::test]
    async fn resolve_unknown_language_fails() {
        let reg = registry(vec![config("pylsp", &[".py"], &["python"])]);
        let err = reg.resolve_by_language("haskell").await.unwrap_err();
        assert!(err.to_string().contains("haskell"));
    }

    #[tokio::test]
    async fn resolution_does_not_start_sessions() {
        let reg = registry(vec![config("pylsp", &[".py"], &["python"])]);
        let session = reg.resolve_by_id("pylsp").await.unwrap();
        assert_eq!(session.lock().await.state(), SessionState::NotStarted);
        assert_eq!(reg.running_count().await, 0);
    }

    #[tokio::test]
    async fn start_one_unknown_id_fails() {
        let reg = registry(vec![config("pylsp", &[".py"], &["python"])]);
        let err = reg.start_one("gopls").await.unwrap_err();
        assert!(matches!(err, LspError::UnknownServer(_)));
    }

    #[tokio::test]
    async fn start_all_collects_failures() {
        // Both commands are unspawnable; start_all must attempt both and
        // report both, not stop at the first.
        let reg = registry(vec![
            config("ghost-a", &[".a"], &["a"]),
            config("ghost-b", &[".b"], &["b"]),
        ]);
        let err = reg.start_all().await.unwrap_err();
        match err {
            LspError::StartAll {
                failed,
                total,
                details,
            } => {
                assert_eq!(failed, 2);
                assert_eq!(total, 2);
                assert!(details.contains("ghost-a"));
                assert!(details.contains("ghost-b"));
            }
            other => panic!("expected StartAll, got {:?}", other),
        }
        assert_eq!(reg.running_count().await, 0);
    }

    #[tokio::test]
    async fn shutdown_all_is_idempotent() {
        let reg = registry(vec![
            config("a", &[".a"], &["a"]),
            config("b", &[".b"], &["b"]),
            config("c", &[".c"], &["c"]),
        ]);
        reg.shutdown_all().await;
        reg.shutdown_all().await;
        assert_eq!(reg.tracked_count().await, 0);
        assert_eq!(reg.running_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_all_stops_and_discards_every_session() {
        let reg = registry(vec![
            config("a", &[".a"], &["a"]),
            config("b", &[".b"], &["b"]),
            config("c", &[".c"], &["c"]),
        ]);
        for id in ["a", "b", "c"] {
            let session = reg.resolve_by_id(id).await.unwrap();
            session.lock().await.force_running(serde_json::Map::new());
        }
        // Give the middle session a transport whose peer is gone, so its
        // shutdown request fails; the others must still be torn down.
        {
            let (client, server) = tokio::io::duplex(1024);
            let (client_read, client_write) = tokio::io::split(client);
            let transport = Transport::start(client_write, client_read);
            drop(server);
            let session = reg.resolve_by_id("b").await.unwrap();
            session.lock().await.attach_transport(transport);
        }
        assert_eq!(reg.tracked_count().await, 3);
        assert_eq!(reg.running_count().await, 3);

        reg.shutdown_all().await;
        assert_eq!(reg.tracked_count().await, 0);
        assert_eq!(reg.running_count().await, 0);
    }

    #[tokio::test]
    async fn shutdown_all_leaves_servers_resolvable() {
        let reg = registry(vec![config("pylsp", &[".py"], &["python"])]);
        let session = reg.resolve_by_id("pylsp").await.unwrap();
        session.lock().await.force_running(serde_json::Map::new());

        reg.shutdown_all().await;
        assert_eq!(reg.tracked_count().await, 0);

        // A later resolution gets a fresh NotStarted session.
        let fresh = reg.resolve_by_id("pylsp").await.unwrap();
        assert!(!Arc::ptr_eq(&session, &fresh));
        assert_eq!(fresh.lock().await.state(), SessionState::NotStarted);
    }

    #[tokio::test]
    async fn list_reports_config_order_and_status() {
        let reg = registry(vec![
            config("pylsp", &[".py"], &["python"]),
            config("gopls", &[".go"], &["go"]),
        ]);
        let summaries = reg.list().await;
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].id, "pylsp");
        assert_eq!(summaries[1].id, "gopls");
        assert_eq!(summaries[0].status, ServerStatus::Stopped);
        assert_eq!(summaries[0].extensions, vec![".py".to_string()]);
    }

    #[tokio::test]
    async fn describe_stopped_has_no_capabilities() {
        let reg = registry(vec![config("pylsp", &[".py"], &["python"])]);
        let report = reg.describe("pylsp").await.unwrap();
        assert_eq!(report.status, ServerStatus::Stopped);
        assert!(report.capabilities.is_none());
        assert_eq!(report.config.id, "pylsp");
    }

    #[tokio::test]
    async fn describe_running_includes_capabilities() {
        let reg = registry(vec![config("pylsp", &[".py"], &["python"])]);
        let session = reg.resolve_by_id("pylsp").await.unwrap();
        session.lock().await.force_running(
            [("hoverProvider".to_string(), serde_json::json!(true))]
                .into_iter()
                .collect(),
        );

        let report = reg.describe("pylsp").await.unwrap();
        assert_eq!(report.status, ServerStatus::Running);
        let caps = report.capabilities.unwrap();
        assert_eq!(caps["hoverProvider"], true);
    }

    #[tokio::test]
    async fn describe_unknown_fails() {
        let reg = registry(vec![]);
        assert!(reg.describe("pylsp").await.is_err());
    }

    #[test]
    fn debug_format() {
        let reg = registry(vec![config("pylsp", &[".py"], &["python"])]);
        let debug = format!("{:?}", reg);
        assert!(debug.contains("ServerRegistry"));
    }
}
