//! MCP (Model Context Protocol) client side
//!
//! - `process`: spawns and supervises one child server
//! - `transport` + `pending`: line framing and the request table
//! - `client`: JSON-RPC multiplexer (`initialize`, `tools/list`, `tools/call`)
//! - `registry`: named servers, lazy start from cache, callables

mod client;
mod error;
mod pending;
mod process;
mod registry;
mod tool;
mod transport;
mod types;

pub use client::{McpClient, CLIENT_NAME};
pub use error::McpError;
pub use process::{
    node_launcher_candidates, resolve_command, ProcessOptions, ProcessPipes, ServerProcess,
};
pub use registry::{Registry, StartReport};
pub use tool::{McpToolHandle, ToolCallable};
pub use transport::{decode_line, encode_line, FrameWriter};
pub use types::{split_qualified, CacheStatus, McpTool, ServerInfo, ServerState, ServerStatus};
