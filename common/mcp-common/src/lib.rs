//! MCP Common - Shared pieces for stdio MCP clients and servers
//!
//! - **Protocol**: JSON-RPC 2.0 envelopes and the MCP tool payloads
//! - **Results**: Helper functions for building `tools/call` results
//! - **Init**: [`init_tracing`] for stderr logging
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_common::{text_result, JsonRpcResponse};
//!
//! let response = JsonRpcResponse::success(id, text_result("pong"));
//! ```

pub mod init;
pub mod protocol;
pub mod result;

pub use init::init_tracing;
pub use protocol::{
    codes, methods, CallToolParams, Implementation, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListToolsParams, ListToolsResult,
    ToolDescriptor, JSONRPC_VERSION, PROTOCOL_VERSION,
};
pub use result::{
    error_result, image_content, image_result, json_result, multi_result, text_content,
    text_result,
};
