//! Framed JSON-RPC transport over a subprocess's stdio pipes.
//!
//! Messages are framed with the LSP `Content-Length` header convention.
//! A [`Transport`] owns one writer task and one background read loop;
//! outgoing requests are correlated with replies by id through the
//! [`CorrelationTable`]. Handles are cheap to clone, so several callers
//! can have requests in flight on the same session concurrently.
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout, Duration};

use crate::correlation::{CorrelationTable, ReplyOutcome};
use crate::error::LspError;

/// Global request ID counter. Ids are unique across every transport in
/// the process, which trivially satisfies per-session uniqueness.
static NEXT_REQUEST_ID: AtomicI64 = AtomicI64::new(1);

/// Generate the next unique request ID.
pub fn next_request_id() -> i64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// A parsed incoming JSON-RPC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonRpcMessage {
    /// A server-initiated request (has id and method). Not supported;
    /// logged and dropped by the read loop.
    Request {
        /// The request ID.
        id: i64,
        /// The method name.
        method: String,
    },
    /// A response to one of our requests.
    Response {
        /// The request ID this responds to.
        id: i64,
        /// The result, if successful.
        result: Option<serde_json::Value>,
        /// The error, if failed.
        error: Option<RpcError>,
    },
    /// A server notification. Logged and dropped by the read loop.
    Notification {
        /// The method name.
        method: String,
    },
}

/// An error object in a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    /// The error code.
    pub code: i32,
    /// The error message.
    pub message: String,
}

/// Frame a JSON body with the Content-Length header.
pub fn frame_message(body: &str) -> Vec<u8> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut bytes = header.into_bytes();
    bytes.extend_from_slice(body.as_bytes());
    bytes
}

/// Serialize a JSON-RPC request.
pub fn serialize_request(id: i64, method: &str, params: serde_json::Value) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
    .to_string()
}

/// Serialize a JSON-RPC notification (no id).
pub fn serialize_notification(method: &str, params: serde_json::Value) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params
    })
    .to_string()
}

/// Parse a JSON-RPC message from a frame body.
pub fn parse_message(json_str: &str) -> Result<JsonRpcMessage, LspError> {
    let value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| LspError::InvalidMessage(format!("invalid JSON: {}", e)))?;

    let has_id = value.get("id").is_some();
    let has_method = value.get("method").is_some();

    match (has_id, has_method) {
        (true, true) => {
            let id = value["id"]
                .as_i64()
                .ok_or_else(|| LspError::InvalidMessage("id must be an integer".into()))?;
            let method = value["method"]
                .as_str()
                .ok_or_else(|| LspError::InvalidMessage("method must be a string".into()))?
                .to_string();
            Ok(JsonRpcMessage::Request { id, method })
        }
        (true, false) => {
            let id = value["id"]
                .as_i64()
                .ok_or_else(|| LspError::InvalidMessage("id must be an integer".into()))?;
            let result = value.get("result").cloned();
            let error = value.get("error").and_then(|e| {
                Some(RpcError {
                    code: e.get("code")?.as_i64()? as i32,
                    message: e.get("message")?.as_str()?.to_string(),
                })
            });
            Ok(JsonRpcMessage::Response { id, result, error })
        }
        (false, true) => {
            let method = value["method"]
                .as_str()
                .ok_or_else(|| LspError::InvalidMessage("method must be a string".into()))?
                .to_string();
            Ok(JsonRpcMessage::Notification { method })
        }
        (false, false) => Err(LspError::InvalidMessage(
            "message has neither id nor method".to_string(),
        )),
    }
}

/// Read one framed message body from the stream.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary.
pub(crate) async fn read_frame<R>(reader: &mut BufReader<R>) -> Result<Option<String>, LspError>
where
    R: AsyncRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None); // EOF
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Some(val) = trimmed.strip_prefix("Content-Length:") {
            content_length = Some(val.trim().parse().map_err(|_| {
                LspError::InvalidMessage(format!("invalid Content-Length: {}", val.trim()))
            })?);
        }
    }

    let length = content_length
        .ok_or_else(|| LspError::InvalidMessage("missing Content-Length header".into()))?;

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    String::from_utf8(body)
        .map(Some)
        .map_err(|_| LspError::InvalidMessage("invalid UTF-8 in frame body".into()))
}

/// Handle to a running framed transport.
///
/// Cloning shares the underlying writer queue and correlation table.
/// When the peer closes its output, every outstanding request fails
/// with [`LspError::TransportClosed`] and the read loop terminates.
#[derive(Clone)]
pub struct Transport {
    writer_tx: mpsc::Sender<Vec<u8>>,
    correlation: Arc<Mutex<CorrelationTable>>,
}

impl Transport {
    /// Start a transport over the given pipe halves, spawning the writer
    /// task and the background read loop.
    pub fn start<W, R>(writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(64);
        tokio::spawn(async move {
            let mut writer = writer;
            while let Some(msg) = writer_rx.recv().await {
                if writer.write_all(&msg).await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        let correlation = Arc::new(Mutex::new(CorrelationTable::new()));
        let table = correlation.clone();
        tokio::spawn(async move {
            run_read_loop(reader, table).await;
        });

        Self {
            writer_tx,
            correlation,
        }
    }

    /// Send a request and wait for the correlated reply.
    ///
    /// On timeout the request is abandoned, not retried; the pending
    /// entry is left in place and cleaned up lazily if a late reply
    /// arrives.
    pub async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
        deadline: Duration,
    ) -> Result<serde_json::Value, LspError> {
        let id = next_request_id();
        let rx = {
            let mut table = self.correlation.lock().await;
            table.register(id)
        };

        let framed = frame_message(&serialize_request(id, method, params));
        self.writer_tx
            .send(framed)
            .await
            .map_err(|_| LspError::TransportClosed)?;

        match timeout(deadline, rx).await {
            Err(_) => Err(LspError::Timeout {
                method: method.to_string(),
                timeout: deadline,
            }),
            Ok(Err(_)) => Err(LspError::TransportClosed),
            Ok(Ok(ReplyOutcome::Result(value))) => Ok(value),
            Ok(Ok(ReplyOutcome::Error(err))) => Err(LspError::Rpc {
                code: err.code,
                message: err.message,
            }),
        }
    }

    /// Send a notification. Fire-and-forget; no correlation.
    pub async fn notify(&self, method: &str, params: serde_json::Value) -> Result<(), LspError> {
        let framed = frame_message(&serialize_notification(method, params));
        self.writer_tx
            .send(framed)
            .await
            .map_err(|_| LspError::TransportClosed)
    }

    /// How many requests are awaiting replies.
    pub async fn pending_count(&self) -> usize {
        self.correlation.lock().await.pending_count()
    }
}

/// Parse frames from the peer until EOF or a fatal read error, routing
/// responses to their waiters. Unexpected notifications and
/// server-initiated requests are logged and dropped.
async fn run_read_loop<R>(reader: R, correlation: Arc<Mutex<CorrelationTable>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    loop {
        let body = match read_frame(&mut reader).await {
            Ok(Some(body)) => body,
            Ok(None) => break,
            Err(LspError::Io(_)) => break,
            Err(e) => {
                tracing::warn!("skipping unparseable frame: {}", e);
                continue;
            }
        };

        let message = match parse_message(&body) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("skipping invalid message: {}", e);
                continue;
            }
        };

        match message {
            JsonRpcMessage::Response { id, result, error } => {
                let outcome = match error {
                    Some(err) => ReplyOutcome::Error(err),
                    None => ReplyOutcome::Result(result.unwrap_or(serde_json::Value::Null)),
                };
                correlation.lock().await.complete(id, outcome);
            }
            JsonRpcMessage::Notification { method } => {
                tracing::debug!(method, "dropping server notification");
            }
            JsonRpcMessage::Request { id, method } => {
                tracing::warn!(id, method, "dropping unsupported server-initiated request");
            }
        }
    }

    correlation.lock().await.fail_all();
}
