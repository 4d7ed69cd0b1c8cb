//! JSON-RPC client and multiplexer over one child's stdio
//!
//! Any number of requests may be in flight at once. Each gets a fresh id and
//! its own pending slot; the single reader loop routes responses by id.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mcp_common::{
    methods, CallToolParams, Implementation, InitializeParams, InitializeResult, JsonRpcRequest,
    ListToolsParams, ListToolsResult, ToolDescriptor, PROTOCOL_VERSION,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

use super::error::McpError;
use super::pending::PendingRequests;
use super::process::ProcessPipes;
use super::transport::{spawn_reader_loop, FrameWriter};
use super::types::ServerInfo;

/// Client identity sent in `initialize`
pub const CLIENT_NAME: &str = "gradio-mcp-playground";

/// Connection to one MCP server
pub struct McpClient {
    server: String,
    writer: FrameWriter,
    pending: Arc<PendingRequests>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl McpClient {
    /// Wire a client onto a pair of pipes and start the reader loop
    pub fn new<W, R>(server: &str, stdin: W, stdout: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let pending = Arc::new(PendingRequests::new(server));
        let reader = spawn_reader_loop(server.to_string(), stdout, pending.clone());
        Self {
            server: server.to_string(),
            writer: FrameWriter::new(server, stdin),
            pending,
            next_id: AtomicU64::new(1),
            reader,
        }
    }

    pub fn from_pipes(server: &str, pipes: ProcessPipes) -> Self {
        Self::new(server, pipes.stdin, pipes.stdout)
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Send a request and wait for its response.
    ///
    /// `timeout` covers the whole exchange: waiting for the write lock,
    /// writing the frame and waiting for the answer. On timeout the slot is
    /// dropped; a response that shows up later is discarded by the reader
    /// loop. No cancellation is sent to the server.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.pending.register(id).await?;

        tracing::debug!("[{}] -> {} (id {})", self.server, method, id);
        let exchange = async {
            if let Err(e) = self.writer.send(&JsonRpcRequest::new(id, method, params)).await {
                return Err(e);
            }
            match rx.await {
                Ok(outcome) => outcome,
                // Slot dropped without an answer: the table went away with the connection
                Err(_) => Err(McpError::closed(&self.server)),
            }
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(outcome) => {
                if outcome.is_err() {
                    self.pending.remove(id).await;
                }
                outcome
            }
            Err(_) => {
                self.pending.remove(id).await;
                tracing::warn!(
                    "[{}] {} (id {}) timed out after {:?}",
                    self.server,
                    method,
                    id,
                    timeout
                );
                Err(McpError::CallTimeout {
                    server: self.server.clone(),
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Fire-and-forget notification
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.writer
            .send(&JsonRpcRequest::notification(method, params))
            .await
    }

    /// MCP handshake: `initialize`, then `notifications/initialized`
    pub async fn initialize(&self, timeout: Duration) -> Result<ServerInfo, McpError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: Implementation {
                name: CLIENT_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let raw = self
            .request(methods::INITIALIZE, Some(self.encode(&params)?), timeout)
            .await
            .map_err(|e| match e {
                McpError::CallTimeout { server, timeout, .. } => {
                    McpError::InitTimeout { server, timeout }
                }
                other => other,
            })?;

        let result: InitializeResult = self.decode(methods::INITIALIZE, raw)?;
        let info = ServerInfo::from(result);
        tracing::info!(
            "[{}] initialized: {} {} (protocol {})",
            self.server,
            info.name,
            info.version,
            info.protocol_version
        );

        self.notify(methods::INITIALIZED, None).await?;
        Ok(info)
    }

    /// `tools/list`, following `nextCursor` until exhausted.
    ///
    /// `timeout` bounds each page request.
    pub async fn list_tools(&self, timeout: Duration) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut tools = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = ListToolsParams {
                cursor: cursor.clone(),
            };
            let raw = self
                .request(methods::TOOLS_LIST, Some(self.encode(&params)?), timeout)
                .await?;
            let page: ListToolsResult = self.decode(methods::TOOLS_LIST, raw)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if seen.insert(next.clone()) => cursor = Some(next),
                Some(next) => {
                    tracing::warn!("[{}] repeated tools/list cursor '{}'", self.server, next);
                    break;
                }
                None => break,
            }
        }

        tracing::debug!("[{}] discovered {} tools", self.server, tools.len());
        Ok(tools)
    }

    /// `tools/call`; returns the raw result object
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        self.request(methods::TOOLS_CALL, Some(self.encode(&params)?), timeout)
            .await
    }

    /// Fail everything pending and stop reading
    pub async fn close(&self) {
        let failed = self.pending.close().await;
        if failed > 0 {
            tracing::debug!("[{}] closed with {} requests pending", self.server, failed);
        }
        self.reader.abort();
    }

    /// True once stdout hit EOF, [`close`](Self::close) ran, or a frame was
    /// left half-written on stdin
    pub async fn is_closed(&self) -> bool {
        self.writer.is_torn() || self.pending.is_closed().await
    }

    fn encode<T: Serialize>(&self, params: &T) -> Result<Value, McpError> {
        serde_json::to_value(params).map_err(|e| McpError::InvalidResponse {
            server: self.server.clone(),
            reason: format!("failed to encode params: {}", e),
        })
    }

    fn decode<T: DeserializeOwned>(&self, method: &str, raw: Value) -> Result<T, McpError> {
        serde_json::from_value(raw).map_err(|e| McpError::InvalidResponse {
            server: self.server.clone(),
            reason: format!("unexpected {} result: {}", method, e),
        })
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    /// Minimal in-process server: answers each request via `respond`
    fn fake_server<F>(respond: F) -> (DuplexStream, DuplexStream, JoinHandle<()>)
    where
        F: Fn(&Value) -> Option<Value> + Send + 'static,
    {
        let (client_in, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, client_out) = tokio::io::duplex(64 * 1024);

        let handle = tokio::spawn(async move {
            let mut lines = BufReader::new(server_in).lines();
            let mut out = server_out;
            while let Ok(Some(line)) = lines.next_line().await {
                let msg: Value = serde_json::from_str(&line).unwrap();
                if let Some(reply) = respond(&msg) {
                    let mut text = reply.to_string();
                    text.push('\n');
                    if out.write_all(text.as_bytes()).await.is_err() {
                        break;
                    }
                }
            }
        });

        (client_in, client_out, handle)
    }

    fn reply(msg: &Value, result: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": msg["id"], "result": result})
    }

    #[tokio::test]
    async fn test_initialize_and_list_with_pagination() {
        let (stdin, stdout, _server) = fake_server(|msg| match msg["method"].as_str()? {
            "initialize" => {
                assert_eq!(msg["params"]["protocolVersion"], "2024-11-05");
                assert_eq!(msg["params"]["clientInfo"]["name"], CLIENT_NAME);
                Some(reply(
                    msg,
                    json!({"protocolVersion": "2024-11-05", "serverInfo": {"name": "fake", "version": "0.1"}}),
                ))
            }
            "notifications/initialized" => None,
            "tools/list" => match msg["params"]["cursor"].as_str() {
                None => Some(reply(msg, json!({"tools": [{"name": "a"}], "nextCursor": "p2"}))),
                Some("p2") => Some(reply(msg, json!({"tools": [{"name": "b", "description": "B"}]}))),
                Some(_) => None,
            },
            _ => None,
        });

        let client = McpClient::new("fake", stdin, stdout);
        let info = client.initialize(Duration::from_secs(5)).await.unwrap();
        assert_eq!(info.name, "fake");

        let tools = client.list_tools(Duration::from_secs(5)).await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(tools[1].description, "B");
    }

    #[tokio::test]
    async fn test_server_error_is_surfaced() {
        let (stdin, stdout, _server) = fake_server(|msg| {
            Some(json!({
                "jsonrpc": "2.0",
                "id": msg["id"],
                "error": {"code": -32602, "message": "unknown tool"}
            }))
        });

        let client = McpClient::new("fake", stdin, stdout);
        let err = client
            .call_tool("nope", Map::new(), Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            McpError::ServerError { code, message, .. } => {
                assert_eq!(code, -32602);
                assert_eq!(message, "unknown tool");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_then_usable() {
        let (stdin, stdout, _server) = fake_server(|msg| {
            if msg["params"]["name"] == "hang" {
                None
            } else {
                Some(reply(msg, json!({"content": [{"type": "text", "text": "pong"}]})))
            }
        });

        let client = McpClient::new("fake", stdin, stdout);
        let err = client
            .call_tool("hang", Map::new(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::CallTimeout { .. }));
        assert_eq!(client.pending.len().await, 0);

        let ok = client
            .call_tool("ping", Map::new(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(ok["content"][0]["text"], "pong");
    }

    #[tokio::test]
    async fn test_timeout_covers_a_blocked_write() {
        // neither end of the server side is ever read or written
        let (stdin, _server_in) = tokio::io::duplex(64);
        let (_server_out, stdout) = tokio::io::duplex(64);
        let client = Arc::new(McpClient::new("stuck", stdin, stdout));

        let mut blob = Map::new();
        blob.insert("blob".to_string(), Value::from("x".repeat(100_000)));
        let first = tokio::time::timeout(
            Duration::from_secs(3),
            client.call_tool("echo", blob, Duration::from_millis(200)),
        )
        .await
        .expect("call blocked past its own timeout");
        assert!(matches!(first, Err(McpError::CallTimeout { .. })));
        assert_eq!(client.pending.len().await, 0);

        // the half-written frame makes the pipe unusable, and callers are told so
        let second = tokio::time::timeout(
            Duration::from_secs(3),
            client.call_tool("ping", Map::new(), Duration::from_secs(1)),
        )
        .await
        .expect("second call blocked behind the first");
        assert!(matches!(second, Err(McpError::ConnectionClosed { .. })));
        assert!(client.is_closed().await);
    }

    #[tokio::test]
    async fn test_blocked_initialize_maps_to_init_timeout() {
        let (stdin, _server_in) = tokio::io::duplex(8);
        let (_server_out, stdout) = tokio::io::duplex(64);
        let client = McpClient::new("stuck", stdin, stdout);

        let outcome = tokio::time::timeout(
            Duration::from_secs(3),
            client.initialize(Duration::from_millis(200)),
        )
        .await
        .expect("initialize blocked past its own timeout");
        assert!(matches!(outcome, Err(McpError::InitTimeout { .. })));
    }

    #[tokio::test]
    async fn test_initialize_timeout_maps_to_init_timeout() {
        let (stdin, stdout, _server) = fake_server(|_| None);
        let client = McpClient::new("fake", stdin, stdout);
        let err = client
            .initialize(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InitTimeout { .. }));
    }

    #[tokio::test]
    async fn test_eof_fails_pending_calls() {
        let (stdin, stdout, server) = fake_server(|_| None);
        let client = Arc::new(McpClient::new("fake", stdin, stdout));

        let waiter = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .call_tool("hang", Map::new(), Duration::from_secs(30))
                    .await
            })
        };

        // let the request reach the server before pulling the plug
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.abort();

        let outcome = waiter.await.unwrap();
        assert!(matches!(outcome, Err(McpError::ConnectionClosed { .. })));
        assert!(client.is_closed().await);

        let again = client
            .call_tool("ping", Map::new(), Duration::from_secs(1))
            .await;
        assert!(matches!(again, Err(McpError::ConnectionClosed { .. })));
    }

    #[tokio::test]
    async fn test_close_fails_in_flight_calls() {
        let (stdin, stdout, _server) = fake_server(|_| None);
        let client = Arc::new(McpClient::new("fake", stdin, stdout));

        let waiter = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .call_tool("hang", Map::new(), Duration::from_secs(30))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.close().await;

        assert!(matches!(
            waiter.await.unwrap(),
            Err(McpError::ConnectionClosed { .. })
        ));
    }
}
