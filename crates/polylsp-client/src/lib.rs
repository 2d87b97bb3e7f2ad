//! polylsp-client — manages language server subprocesses over LSP.
//!
//! This crate owns the protocol lifecycle: spawning servers, the
//! initialize/initialized handshake, capability tracking, routing by
//! server id / file extension / language id, id-correlated
//! request/reply exchange with timeouts, and clean shutdown. It hands
//! replies back structurally unmodified; formatting them for humans (or
//! tools) is the caller's concern.
pub mod correlation;
pub mod error;
pub mod facade;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

// Re-export key types for convenience.
pub use error::LspError;
pub use facade::{DispatchOutcome, LspFacade, ServerSelector};
pub use registry::{ServerRegistry, SharedSession};
pub use session::{ServerSession, DEFAULT_REQUEST_TIMEOUT};
pub use transport::Transport;
pub use types::{
    client_capabilities, required_capability, ServerConfig, ServerReport, ServerStatus,
    ServerSummary, SessionState,
};
