//! MCP type definitions
//!
//! Shared types used by the client, the registry and the CLI.

use mcp_common::{InitializeResult, ToolDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::McpError;

/// A tool from an MCP server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpTool {
    /// Server this tool belongs to
    pub server: String,
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
    /// Input schema (JSON)
    pub input_schema: Value,
}

impl McpTool {
    pub fn from_descriptor(server: &str, descriptor: &ToolDescriptor) -> Self {
        Self {
            server: server.to_string(),
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            input_schema: descriptor.input_schema.clone(),
        }
    }

    /// `{server}.{tool}`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.server, self.name)
    }
}

/// Split `server.tool` at the first dot
pub fn split_qualified(name: &str) -> Result<(&str, &str), McpError> {
    match name.split_once('.') {
        Some((server, tool)) if !server.is_empty() && !tool.is_empty() => Ok((server, tool)),
        _ => Err(McpError::InvalidToolName(name.to_string())),
    }
}

/// What the server reported about itself during `initialize`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
    pub instructions: Option<String>,
}

impl From<InitializeResult> for ServerInfo {
    fn from(result: InitializeResult) -> Self {
        let (name, version) = result
            .server_info
            .map(|info| (info.name, info.version))
            .unwrap_or_default();
        Self {
            name,
            version,
            protocol_version: result.protocol_version,
            instructions: result.instructions,
        }
    }
}

/// State of a registered server
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ServerState {
    /// Tools known from the cache, process not spawned yet
    Idle,
    /// Process running and connected
    Running,
    /// Stopped on request
    Stopped,
    /// Connection closed underneath us (crash or EOF)
    Failed,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerState::Idle => write!(f, "idle"),
            ServerState::Running => write!(f, "running"),
            ServerState::Stopped => write!(f, "stopped"),
            ServerState::Failed => write!(f, "failed"),
        }
    }
}

/// Cache status of a server's tool list
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CacheStatus {
    Unknown,
    Valid,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheStatus::Unknown => write!(f, "unknown"),
            CacheStatus::Valid => write!(f, "valid"),
        }
    }
}

/// Status of a registered MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    pub name: String,
    pub state: ServerState,
    pub tool_count: usize,
    pub cache_status: CacheStatus,
    pub pid: Option<u32>,
    pub uptime_secs: Option<u64>,
}
