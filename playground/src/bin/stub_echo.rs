//! stub-echo: a small line-delimited JSON-RPC tool server
//!
//! Used by the integration tests to exercise the client end to end.
//! Requests are handled concurrently and answered out of order when they
//! sleep, which is exactly what the multiplexer has to cope with.
//!
//! Environment:
//! - `STUB_EXIT_IMMEDIATELY`: print a fatal error to stderr and exit 2
//! - `STUB_COUNTER_FILE`: append a line to this file on every `tools/list`
//!
//! Tools: `ping`, `echo`, `hang`, `crash`, `image`, `big`, `fail`.

use std::io::Write as _;
use std::time::Duration;

use anyhow::Result;
use mcp_common::{
    codes, image_result, json_result, methods, text_result, CallToolParams, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, ToolDescriptor, PROTOCOL_VERSION,
};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    mcp_common::init_tracing("stub_echo")?;

    if std::env::var_os("STUB_EXIT_IMMEDIATELY").is_some() {
        tracing::error!("fatal error: boom");
        std::process::exit(2);
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Single writer so concurrent handlers never interleave lines
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(mut line) = rx.recv().await {
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    // Servers in the wild print banners on stdout; so does this one
    let _ = tx.send("stub-echo ready".to_string());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Ignoring malformed request: {}", e);
                continue;
            }
        };

        let Some(id) = request.id.clone() else {
            tracing::debug!("notification: {}", request.method);
            continue;
        };

        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(response) = handle(id, request).await {
                match serde_json::to_string(&response) {
                    Ok(line) => {
                        let _ = tx.send(line);
                    }
                    Err(e) => tracing::error!("Failed to encode response: {}", e),
                }
            }
        });
    }

    tracing::debug!("stdin closed, exiting");
    drop(tx);
    let _ = writer.await;
    Ok(())
}

async fn handle(id: Value, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
    match request.method.as_str() {
        methods::INITIALIZE => Some(JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "stub-echo", "version": env!("CARGO_PKG_VERSION")}
            }),
        )),
        methods::TOOLS_LIST => {
            bump_counter();
            let result = ListToolsResult {
                tools: tools(),
                next_cursor: None,
            };
            Some(match serde_json::to_value(result) {
                Ok(value) => JsonRpcResponse::success(id, value),
                Err(e) => JsonRpcResponse::failure(id, JsonRpcError::internal_error(e.to_string())),
            })
        }
        methods::TOOLS_CALL => {
            let params: CallToolParams =
                match serde_json::from_value(request.params.unwrap_or(Value::Null)) {
                    Ok(params) => params,
                    Err(e) => {
                        return Some(JsonRpcResponse::failure(
                            id,
                            JsonRpcError::invalid_params(e.to_string()),
                        ))
                    }
                };
            call_tool(id, params).await
        }
        "ping" => Some(JsonRpcResponse::success(id, json!({}))),
        other => Some(JsonRpcResponse::failure(
            id,
            JsonRpcError::method_not_found(other),
        )),
    }
}

async fn call_tool(id: Value, params: CallToolParams) -> Option<JsonRpcResponse> {
    let delay = params
        .arguments
        .get("delay_ms")
        .and_then(Value::as_u64)
        .map(Duration::from_millis);
    let size = params
        .arguments
        .get("size")
        .and_then(Value::as_u64)
        .unwrap_or(5_000) as usize;

    match params.name.as_str() {
        "ping" => Some(JsonRpcResponse::success(id, text_result("pong"))),
        "echo" => {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let payload = json!({"request_id": id, "arguments": params.arguments});
            Some(match json_result(&payload) {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(e) => JsonRpcResponse::failure(id, JsonRpcError::internal_error(e.to_string())),
            })
        }
        "hang" => {
            tracing::debug!("hang: request {} will never be answered", id);
            None
        }
        "crash" => {
            tokio::time::sleep(delay.unwrap_or_default()).await;
            tracing::error!("crash requested, exiting");
            std::process::exit(1);
        }
        "image" => {
            let data = format!("iVBORw0KGgo{}", "A".repeat(size));
            Some(JsonRpcResponse::success(id, image_result(data, "image/png")))
        }
        "big" => Some(JsonRpcResponse::success(id, text_result("x".repeat(size)))),
        "fail" => Some(JsonRpcResponse::failure(
            id,
            JsonRpcError::new(-32000, "tool failed on purpose"),
        )),
        other => Some(JsonRpcResponse::failure(
            id,
            JsonRpcError::new(codes::INVALID_PARAMS, format!("Unknown tool: {}", other)),
        )),
    }
}

fn tools() -> Vec<ToolDescriptor> {
    let empty = json!({"type": "object", "properties": {}});
    let delayed = json!({
        "type": "object",
        "properties": {"delay_ms": {"type": "integer", "description": "Sleep before answering"}}
    });
    let sized = json!({
        "type": "object",
        "properties": {"size": {"type": "integer", "description": "Payload length"}}
    });
    vec![
        ToolDescriptor::new("ping", "Reply with pong", empty.clone()),
        ToolDescriptor::new("echo", "Echo the request id and arguments", delayed.clone()),
        ToolDescriptor::new("hang", "Never reply", empty.clone()),
        ToolDescriptor::new("crash", "Exit the process", delayed),
        ToolDescriptor::new("image", "Return a large base64 image", sized.clone()),
        ToolDescriptor::new("big", "Return a long text", sized),
        ToolDescriptor::new("fail", "Answer with a JSON-RPC error", empty),
    ]
}

fn bump_counter() {
    let Some(path) = std::env::var_os("STUB_COUNTER_FILE") else {
        return;
    };
    let appended = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut file| file.write_all(b"tools/list\n"));
    if let Err(e) = appended {
        tracing::warn!("Failed to update counter file: {}", e);
    }
}
