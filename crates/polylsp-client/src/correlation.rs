//! Pending-request table correlating replies to waiting callers.
//!
//! Each in-flight request owns a oneshot slot keyed by its id. Replies
//! are matched by id, not by arrival order. A reply arriving after its
//! waiter timed out finds a dropped receiver and is discarded silently.
use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::transport::RpcError;

/// The outcome delivered to a waiting request.
#[derive(Debug)]
pub enum ReplyOutcome {
    /// The server's `result` value (null if absent).
    Result(serde_json::Value),
    /// The server's `error` object.
    Error(RpcError),
}

/// Tracks outstanding requests by id.
pub struct CorrelationTable {
    pending: HashMap<i64, oneshot::Sender<ReplyOutcome>>,
}

impl CorrelationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Register an outstanding request and return the receiver the
    /// issuer waits on.
    pub fn register(&mut self, id: i64) -> oneshot::Receiver<ReplyOutcome> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        rx
    }

    /// Deliver a reply to the waiter registered under `id`.
    ///
    /// Replies with no matching entry are logged and dropped. Delivery to
    /// a waiter that gave up (timed out) is a silent no-op; the entry is
    /// still removed.
    pub fn complete(&mut self, id: i64, outcome: ReplyOutcome) {
        match self.pending.remove(&id) {
            Some(sender) => {
                let _ = sender.send(outcome);
            }
            None => {
                tracing::warn!(id, "reply for unknown request id, dropping");
            }
        }
    }

    /// Fail every outstanding request. Dropping the senders makes each
    /// waiter observe a closed channel, which surfaces as a transport
    /// failure.
    pub fn fail_all(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!(count = self.pending.len(), "failing outstanding requests");
        }
        self.pending.clear();
    }

    /// How many requests are outstanding.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}
