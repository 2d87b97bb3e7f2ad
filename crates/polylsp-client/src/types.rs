//! Shared types for server configuration, session state, and introspection.
use serde::Serialize;

/// Configuration for one managed language server. Loaded once at process
/// start and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Unique identifier (e.g. "pylsp").
    pub id: String,
    /// Executable command name.
    pub command: String,
    /// Command-line arguments.
    pub args: Vec<String>,
    /// File extensions this server handles, with or without a leading dot.
    pub extensions: Vec<String>,
    /// Language ids this server handles (e.g. "python").
    pub languages: Vec<String>,
}

/// Lifecycle state of a server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session created but never started.
    NotStarted,
    /// Spawn and handshake in progress.
    Starting,
    /// Handshake complete; ready for requests.
    Running,
    /// Shutdown sequence in progress.
    ShuttingDown,
    /// Stopped; may be started again.
    Stopped,
}

/// Coarse running/stopped status for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// The session is running.
    Running,
    /// The session is not running.
    Stopped,
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStatus::Running => write!(f, "running"),
            ServerStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Per-server summary produced by the registry's listing operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerSummary {
    /// Configured server id.
    pub id: String,
    /// Executable command name.
    pub command: String,
    /// Language ids handled.
    pub languages: Vec<String>,
    /// File extensions handled.
    pub extensions: Vec<String>,
    /// Whether the session is currently running.
    pub status: ServerStatus,
}

/// Detailed report for one server.
#[derive(Debug, Clone)]
pub struct ServerReport {
    /// The server's configuration.
    pub config: ServerConfig,
    /// Whether the session is currently running.
    pub status: ServerStatus,
    /// Advertised server capabilities, present only while running.
    pub capabilities: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Capability advertisement sent in the `initialize` request.
///
/// Declares plaintext+markdown hover, definition link support, references,
/// document symbols, and non-snippet completion.
pub fn client_capabilities() -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "hover": {
                "contentFormat": ["plaintext", "markdown"]
            },
            "definition": {
                "linkSupport": true
            },
            "references": {},
            "documentSymbol": {},
            "completion": {
                "completionItem": {
                    "snippetSupport": false
                }
            }
        },
        "workspace": {
            "symbol": {}
        }
    })
}

/// The server capability a method requires, if any.
///
/// Methods outside the routed subset return `None` and are forwarded
/// without a capability gate.
pub fn required_capability(method: &str) -> Option<&'static str> {
    match method {
        "textDocument/hover" => Some("hoverProvider"),
        "textDocument/definition" => Some("definitionProvider"),
        "textDocument/references" => Some("referencesProvider"),
        "textDocument/documentSymbol" => Some("documentSymbolProvider"),
        "textDocument/completion" => Some("completionProvider"),
        _ => None,
    }
}
