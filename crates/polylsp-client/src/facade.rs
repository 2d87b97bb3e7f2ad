//! Single dispatch entry point for the outer tool layer.
//!
//! Resolves a target session, starts it if needed, gates on the
//! capability the method requires, opens the target document for
//! document-scoped calls, and forwards the request with a timeout. The
//! reply is handed back structurally unmodified; formatting belongs to
//! the caller.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::time::Duration;

use crate::error::LspError;
use crate::registry::ServerRegistry;
use crate::session::DEFAULT_REQUEST_TIMEOUT;
use crate::types::{required_capability, ServerReport, ServerSummary, SessionState};

/// How the caller names the target server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerSelector {
    /// An explicit configured server id.
    Id(String),
    /// A file path, resolved through the extension routing table.
    Path(PathBuf),
}

/// Outcome of a dispatched request.
///
/// A missing capability is an expected, common result, not an error
/// path, so it is reported structurally instead of as a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The server's reply, structure preserved.
    Success(serde_json::Value),
    /// The server does not advertise the capability the method needs;
    /// no wire request was issued.
    Unsupported {
        /// The resolved server id.
        server: String,
        /// The method that was attempted.
        method: String,
        /// The capability the server lacks.
        capability: String,
    },
}

/// Orchestration glue over registry, sessions, and transports.
pub struct LspFacade {
    registry: Arc<ServerRegistry>,
    request_timeout: Duration,
}

impl LspFacade {
    /// Create a façade with the default 30-second request timeout.
    pub fn new(registry: Arc<ServerRegistry>) -> Self {
        Self::with_timeout(registry, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a façade with a custom request timeout.
    pub fn with_timeout(registry: Arc<ServerRegistry>, request_timeout: Duration) -> Self {
        Self {
            registry,
            request_timeout,
        }
    }

    /// The registry this façade routes through.
    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    /// Resolve, ensure started, gate on capability, open the document
    /// if given, and forward the request.
    ///
    /// `document` is the file a document-scoped method targets; it is
    /// opened on the session (once per session lifetime) before the
    /// request goes out. The session lock is released before the
    /// request itself, so concurrent dispatches to one server overlap
    /// on the wire.
    pub async fn dispatch(
        &self,
        selector: &ServerSelector,
        method: &str,
        params: serde_json::Value,
        document: Option<&Path>,
    ) -> Result<DispatchOutcome, LspError> {
        let shared = match selector {
            ServerSelector::Id(id) => self.registry.resolve_by_id(id).await?,
            ServerSelector::Path(path) => self.registry.resolve_by_extension(path).await?,
        };

        let (server, transport) = {
            let mut session = shared.lock().await;

            if session.state() != SessionState::Running {
                session.start().await?;
            }
            let server = session.id().to_string();

            if let Some(capability) = required_capability(method) {
                if !session.has_capability(capability) {
                    tracing::debug!(%server, method, capability, "capability not advertised");
                    return Ok(DispatchOutcome::Unsupported {
                        server,
                        method: method.to_string(),
                        capability: capability.to_string(),
                    });
                }
            }

            if let Some(path) = document {
                let language = session
                    .config()
                    .languages
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "plaintext".to_string());
                session
                    .open_document(path, &language)
                    .await
                    .map_err(|e| request_context(&server, method, e))?;
            }

            let transport = session
                .transport_handle()
                .map_err(|e| request_context(&server, method, e))?;
            (server, transport)
        };

        transport
            .request(method, params, self.request_timeout)
            .await
            .map(DispatchOutcome::Success)
            .map_err(|e| request_context(&server, method, e))
    }

    /// Per-server summaries for introspection.
    pub async fn list_servers(&self) -> Vec<ServerSummary> {
        self.registry.list().await
    }

    /// Config, status, and capabilities for one server.
    pub async fn describe_server(&self, id: &str) -> Result<ServerReport, LspError> {
        self.registry.describe(id).await
    }
}

fn request_context(server: &str, method: &str, source: LspError) -> LspError {
    LspError::Request {
        server: server.to_string(),
        method: method.to_string(),
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use tokio::io::{AsyncWriteExt, BufReader};

    use crate::transport::{frame_message, read_frame, Transport};
    use crate::types::ServerConfig;

    fn config(id: &str, command: &str) -> ServerConfig {
        ServerConfig {
            id: id.into(),
            command: command.into(),
            args: vec![],
            extensions: vec![".py".into()],
            languages: vec!["python".into()],
        }
    }

    fn facade(configs: Vec<ServerConfig>) -> LspFacade {
        let registry = ServerRegistry::new(configs, PathBuf::from("/tmp"));
        LspFacade::new(Arc::new(registry))
    }

    /// Put the named session in the Running state with the given
    /// capabilities and wire it to an in-memory peer.
    async fn rig_session(
        facade: &LspFacade,
        id: &str,
        caps: &[(&str, serde_json::Value)],
    ) -> tokio::io::DuplexStream {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let transport = Transport::start(client_write, client_read);

        let shared = facade.registry().resolve_by_id(id).await.unwrap();
        let mut session = shared.lock().await;
        session.force_running(
            caps.iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        );
        session.attach_transport(transport);
        server
    }

    #[tokio::test]
    async fn unknown_id_selector_fails() {
        let facade = facade(vec![config("pylsp", "pylsp")]);
        let err = facade
            .dispatch(
                &ServerSelector::Id("gopls".into()),
                "textDocument/hover",
                serde_json::json!({}),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LspError::UnknownServer(_)));
    }

    #[tokio::test]
    async fn unrouted_extension_fails() {
        let facade = facade(vec![config("pylsp", "pylsp")]);
        let err = facade
            .dispatch(
                &ServerSelector::Path(PathBuf::from("main.zig")),
                "textDocument/hover",
                serde_json::json!({}),
                None,
            )
            .await
            .unwrap_err();
        match err {
            LspError::UnknownServer(what) => assert!(what.contains(".zig")),
            other => panic!("expected UnknownServer, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_capability_short_circuits_without_wire_request() {
        let facade = facade(vec![config("pylsp", "pylsp")]);
        // Running, but no hoverProvider and no transport attached: any
        // attempt to reach the wire would fail, so the Unsupported
        // outcome proves the request never left the façade.
        {
            let shared = facade.registry().resolve_by_id("pylsp").await.unwrap();
            shared.lock().await.force_running(serde_json::Map::new());
        }

        let outcome = facade
            .dispatch(
                &ServerSelector::Id("pylsp".into()),
                "textDocument/hover",
                serde_json::json!({}),
                None,
            )
            .await
            .unwrap();
        match outcome {
            DispatchOutcome::Unsupported {
                server,
                method,
                capability,
            } => {
                assert_eq!(server, "pylsp");
                assert_eq!(method, "textDocument/hover");
                assert_eq!(capability, "hoverProvider");
            }
            other => panic!("expected Unsupported, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn dispatch_starts_stopped_session_and_propagates_start_failure() {
        let facade = facade(vec![config("ghost", "definitely-not-a-real-command-xyz")]);
        let err = facade
            .dispatch(
                &ServerSelector::Id("ghost".into()),
                "textDocument/hover",
                serde_json::json!({}),
                None,
            )
            .await
            .unwrap_err();
        match err {
            LspError::StartFailure { server, .. } => assert_eq!(server, "ghost"),
            other => panic!("expected StartFailure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn dispatch_forwards_request_and_returns_raw_reply() {
        let facade = facade(vec![config("pylsp", "pylsp")]);
        let peer = rig_session(
            &facade,
            "pylsp",
            &[("hoverProvider", serde_json::json!(true))],
        )
        .await;

        tokio::spawn(async move {
            let (peer_read, mut peer_write) = tokio::io::split(peer);
            let mut reader = BufReader::new(peer_read);
            let body = read_frame(&mut reader).await.unwrap().unwrap();
            let msg: serde_json::Value = serde_json::from_str(&body).unwrap();
            assert_eq!(msg["method"], "textDocument/hover");
            let reply = serde_json::json!({
                "jsonrpc": "2.0",
                "id": msg["id"],
                "result": {"contents": {"kind": "markdown", "value": "fn main()"}}
            })
            .to_string();
            peer_write.write_all(&frame_message(&reply)).await.unwrap();
        });

        let outcome = facade
            .dispatch(
                &ServerSelector::Id("pylsp".into()),
                "textDocument/hover",
                serde_json::json!({"position": {"line": 0, "character": 0}}),
                None,
            )
            .await
            .unwrap();
        match outcome {
            DispatchOutcome::Success(value) => {
                assert_eq!(value["contents"]["value"], "fn main()");
            }
            other => panic!("expected Success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn dispatch_opens_document_before_request() {
        let mut file = tempfile::Builder::new().suffix(".py").tempfile().unwrap();
        writeln!(file, "def f(): pass").unwrap();
        let path = file.path().to_path_buf();

        let facade = facade(vec![config("pylsp", "pylsp")]);
        let peer = rig_session(
            &facade,
            "pylsp",
            &[("documentSymbolProvider", serde_json::json!(true))],
        )
        .await;

        tokio::spawn(async move {
            let (peer_read, mut peer_write) = tokio::io::split(peer);
            let mut reader = BufReader::new(peer_read);

            let body = read_frame(&mut reader).await.unwrap().unwrap();
            let open: serde_json::Value = serde_json::from_str(&body).unwrap();
            assert_eq!(open["method"], "textDocument/didOpen");
            assert_eq!(open["params"]["textDocument"]["languageId"], "python");

            let body = read_frame(&mut reader).await.unwrap().unwrap();
            let req: serde_json::Value = serde_json::from_str(&body).unwrap();
            assert_eq!(req["method"], "textDocument/documentSymbol");
            let reply = serde_json::json!({
                "jsonrpc": "2.0",
                "id": req["id"],
                "result": [{"name": "f", "kind": 12}]
            })
            .to_string();
            peer_write.write_all(&frame_message(&reply)).await.unwrap();
        });

        let outcome = facade
            .dispatch(
                &ServerSelector::Path(path.clone()),
                "textDocument/documentSymbol",
                serde_json::json!({"textDocument": {"uri": format!("file://{}", path.display())}}),
                Some(&path),
            )
            .await
            .unwrap();
        match outcome {
            DispatchOutcome::Success(value) => assert_eq!(value[0]["name"], "f"),
            other => panic!("expected Success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn rpc_error_is_wrapped_with_routing_context() {
        let facade = facade(vec![config("pylsp", "pylsp")]);
        let peer = rig_session(
            &facade,
            "pylsp",
            &[("referencesProvider", serde_json::json!(true))],
        )
        .await;

        tokio::spawn(async move {
            let (peer_read, mut peer_write) = tokio::io::split(peer);
            let mut reader = BufReader::new(peer_read);
            let body = read_frame(&mut reader).await.unwrap().unwrap();
            let msg: serde_json::Value = serde_json::from_str(&body).unwrap();
            let reply = serde_json::json!({
                "jsonrpc": "2.0",
                "id": msg["id"],
                "error": {"code": -32603, "message": "internal error"}
            })
            .to_string();
            peer_write.write_all(&frame_message(&reply)).await.unwrap();
        });

        let err = facade
            .dispatch(
                &ServerSelector::Id("pylsp".into()),
                "textDocument/references",
                serde_json::json!({}),
                None,
            )
            .await
            .unwrap_err();
        match err {
            LspError::Request {
                server,
                method,
                source,
            } => {
                assert_eq!(server, "pylsp");
                assert_eq!(method, "textDocument/references");
                assert!(matches!(*source, LspError::Rpc { code: -32603, .. }));
            }
            other => panic!("expected Request, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_yields_timeout_with_context() {
        let registry = ServerRegistry::new(vec![config("pylsp", "pylsp")], PathBuf::from("/tmp"));
        let facade = LspFacade::with_timeout(Arc::new(registry), Duration::from_secs(2));
        // Keep the peer alive but unresponsive.
        let _peer = rig_session(
            &facade,
            "pylsp",
            &[("hoverProvider", serde_json::json!(true))],
        )
        .await;

        let err = facade
            .dispatch(
                &ServerSelector::Id("pylsp".into()),
                "textDocument/hover",
                serde_json::json!({}),
                None,
            )
            .await
            .unwrap_err();
        match err {
            LspError::Request { source, .. } => {
                assert!(matches!(
                    *source,
                    LspError::Timeout { timeout, .. } if timeout == Duration::from_secs(2)
                ));
            }
            other => panic!("expected Request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unmapped_method_skips_capability_gate() {
        let facade = facade(vec![config("pylsp", "pylsp")]);
        let peer = rig_session(&facade, "pylsp", &[]).await;

        tokio::spawn(async move {
            let (peer_read, mut peer_write) = tokio::io::split(peer);
            let mut reader = BufReader::new(peer_read);
            let body = read_frame(&mut reader).await.unwrap().unwrap();
            let msg: serde_json::Value = serde_json::from_str(&body).unwrap();
            let reply = serde_json::json!({"jsonrpc": "2.0", "id": msg["id"], "result": []})
                .to_string();
            peer_write.write_all(&frame_message(&reply)).await.unwrap();
        });

        let outcome = facade
            .dispatch(
                &ServerSelector::Id("pylsp".into()),
                "workspace/symbol",
                serde_json::json!({"query": "main"}),
                None,
            )
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Success(_)));
    }

    #[tokio::test]
    async fn list_and_describe_delegate_to_registry() {
        let facade = facade(vec![config("pylsp", "pylsp")]);
        let summaries = facade.list_servers().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, "pylsp");

        let report = facade.describe_server("pylsp").await.unwrap();
        assert_eq!(report.config.command, "pylsp");
        assert!(facade.describe_server("gopls").await.is_err());
    }
}
