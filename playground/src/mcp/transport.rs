//! Line-delimited JSON-RPC framing over a child's stdio
//!
//! One JSON object per line in both directions. Lines on stdout that are not
//! a single JSON object are treated as log noise: many servers print banners
//! or stray text there despite the protocol contract.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mcp_common::{JsonRpcRequest, JsonRpcResponse};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::error::McpError;
use super::pending::PendingRequests;

/// Serialize a message to exactly one line, newline included
pub fn encode_line(message: &JsonRpcRequest) -> Result<String, serde_json::Error> {
    // Compact serde_json output escapes control characters, so it never
    // contains a raw newline
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode one stdout line; `None` for blank lines and anything that isn't a JSON object
pub fn decode_line(line: &str) -> Option<Value> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) if value.is_object() => Some(value),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!("Dropping malformed JSON line ({}): {}", e, trimmed);
            None
        }
    }
}

/// Serialized write half of the pipe
///
/// Each frame is written with a single `write_all` under the lock, so
/// concurrent senders never interleave partial JSON. A send that is cancelled
/// (its caller timed out) or fails mid-frame may leave a partial line on the
/// pipe; the writer is then torn and refuses every later frame.
pub struct FrameWriter {
    server: String,
    inner: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    torn: AtomicBool,
}

/// Marks the writer torn when dropped before the frame is fully flushed
struct FrameGuard<'a> {
    torn: &'a AtomicBool,
    done: bool,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.torn.store(true, Ordering::SeqCst);
        }
    }
}

impl FrameWriter {
    pub fn new<W>(server: &str, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            server: server.to_string(),
            inner: Mutex::new(Box::new(writer)),
            torn: AtomicBool::new(false),
        }
    }

    /// Write one message; a broken or torn pipe means the connection is gone
    pub async fn send(&self, message: &JsonRpcRequest) -> Result<(), McpError> {
        let line = encode_line(message).map_err(|e| McpError::InvalidResponse {
            server: self.server.clone(),
            reason: format!("failed to encode request: {}", e),
        })?;

        let mut writer = self.inner.lock().await;
        if self.is_torn() {
            tracing::debug!("[{}] refusing write after a torn frame", self.server);
            return Err(McpError::closed(&self.server));
        }

        let mut guard = FrameGuard {
            torn: &self.torn,
            done: false,
        };
        let written = match writer.write_all(line.as_bytes()).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                guard.done = true;
                Ok(())
            }
            Err(e) => {
                tracing::debug!("[{}] write failed: {}", self.server, e);
                Err(McpError::closed(&self.server))
            }
        }
    }

    /// True once a frame was left half-written or a write failed.
    /// Never waits on an in-flight write.
    pub fn is_torn(&self) -> bool {
        self.torn.load(Ordering::SeqCst)
    }
}

/// Longest stdout line accepted as a frame
pub(crate) const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Result of [`read_line_bounded`]
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LineRead {
    Eof,
    /// A line (newline included, if present) is in the buffer
    Line,
    /// A line longer than the limit was consumed and dropped; its length
    Oversized(usize),
}

/// Read one `\n`-terminated line into `buf`, holding at most `max` bytes.
///
/// Longer lines are consumed up to their newline without being buffered.
pub(crate) async fn read_line_bounded<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut dropped = 0usize;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(if dropped > 0 {
                LineRead::Oversized(dropped)
            } else if buf.is_empty() {
                LineRead::Eof
            } else {
                LineRead::Line
            });
        }

        let (used, done) = match available.iter().position(|b| *b == b'\n') {
            Some(index) => (index + 1, true),
            None => (available.len(), false),
        };
        if dropped > 0 || buf.len() + used > max {
            dropped += buf.len() + used;
            buf.clear();
        } else {
            buf.extend_from_slice(&available[..used]);
        }
        reader.consume(used);

        if done {
            return Ok(if dropped > 0 {
                LineRead::Oversized(dropped)
            } else {
                LineRead::Line
            });
        }
    }
}

/// Spawn the task that reads stdout for the life of the process.
///
/// - Responses (an `id` and no `method`): routed to the matching pending slot;
///   ids with no slot (timed out earlier) are discarded.
/// - Server-initiated requests and notifications: logged and ignored.
/// - EOF or read error: the pending table is closed so every waiter fails
///   with `ConnectionClosed`.
pub(crate) fn spawn_reader_loop<R>(
    server: String,
    stdout: R,
    pending: Arc<PendingRequests>,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();

        loop {
            match read_line_bounded(&mut reader, &mut buf, MAX_FRAME_BYTES).await {
                Ok(LineRead::Eof) => {
                    tracing::debug!("[{}] stdout closed (EOF)", server);
                    break;
                }
                Ok(LineRead::Oversized(len)) => {
                    tracing::warn!("[{}] dropping {} byte stdout line", server, len);
                }
                Ok(LineRead::Line) => {
                    let line = String::from_utf8_lossy(&buf);
                    match decode_line(&line) {
                        Some(message) => dispatch(&server, &pending, message).await,
                        None => {
                            let text = line.trim();
                            if !text.is_empty() {
                                tracing::debug!("[{}] non-protocol output: {}", server, text);
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("[{}] error reading stdout: {}", server, e);
                    break;
                }
            }
        }

        let failed = pending.close().await;
        if failed > 0 {
            tracing::warn!(
                "[{}] failed {} pending requests: connection closed",
                server,
                failed
            );
        }
        tracing::debug!("[{}] reader loop ended", server);
    })
}

async fn dispatch(server: &str, pending: &PendingRequests, message: Value) {
    if let Some(method) = message.get("method").and_then(Value::as_str) {
        if message.get("id").is_some() {
            tracing::debug!("[{}] ignoring server request: {}", server, method);
        } else {
            tracing::debug!("[{}] notification: {}", server, method);
        }
        return;
    }

    let response: JsonRpcResponse = match serde_json::from_value(message) {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!("[{}] dropping unrecognized message: {}", server, e);
            return;
        }
    };

    let Some(id) = response.numeric_id() else {
        tracing::debug!("[{}] dropping response without numeric id", server);
        return;
    };

    let outcome = match response.error {
        Some(error) => Err(McpError::ServerError {
            server: server.to_string(),
            code: error.code,
            message: error.message,
        }),
        None => Ok(response.result.unwrap_or(Value::Null)),
    };

    if !pending.complete(id, outcome).await {
        tracing::debug!("[{}] discarding late response for request {}", server, id);
    }
}
