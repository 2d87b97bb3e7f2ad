//! Error types for language server management.
/// Errors from language server sessions, routing, and dispatch.
#[derive(Debug, thiserror::Error)]
pub enum LspError {
    /// Subprocess spawn or initialize handshake failed. Fatal to that
    /// session only; other sessions are unaffected.
    #[error("server '{server}' failed to start: {reason}")]
    StartFailure {
        /// The configured server id.
        server: String,
        /// What went wrong during spawn or handshake.
        reason: String,
    },

    /// Operation attempted on a session that is not running.
    #[error("server '{0}' is not started")]
    NotStarted(String),

    /// No configured server matches the given id, extension, or language.
    #[error("no server configured for {0}")]
    UnknownServer(String),

    /// No reply arrived within the deadline. Distinct from transport
    /// failure; the request is abandoned, not retried.
    #[error("request '{method}' timed out after {timeout:?}")]
    Timeout {
        /// The LSP method that timed out.
        method: String,
        /// The deadline that elapsed.
        timeout: std::time::Duration,
    },

    /// The subprocess exited or the pipe broke while a request was
    /// outstanding.
    #[error("transport closed: server process exited or pipe broke")]
    TransportClosed,

    /// JSON-RPC error returned by the server.
    #[error("JSON-RPC error {code}: {message}")]
    Rpc {
        /// The error code.
        code: i32,
        /// The error message.
        message: String,
    },

    /// A frame from the server could not be parsed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// One or more sessions failed during a collected startup.
    #[error("failed to start {failed} of {total} servers: {details}")]
    StartAll {
        /// How many sessions failed to start.
        failed: usize,
        /// How many sessions were attempted.
        total: usize,
        /// Per-server failure descriptions, joined.
        details: String,
    },

    /// A dispatched request failed; carries the routing context.
    #[error("'{method}' on server '{server}': {source}")]
    Request {
        /// The server the request was routed to.
        server: String,
        /// The LSP method attempted.
        method: String,
        /// The underlying failure.
        #[source]
        source: Box<LspError>,
    },
}
