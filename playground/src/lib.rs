//! MCP Playground - supervisor and stdio client for MCP tool servers
//!
//! Spawns tool servers as child processes, speaks line-delimited JSON-RPC
//! to them, sanitizes what comes back, and caches discovered tool lists so
//! warm starts skip discovery.

pub mod cache;
pub mod config;
pub mod mcp;
pub mod paths;
pub mod sanitize;

pub use cache::{CacheEntry, CacheError, CacheStats, CapabilityCache};
pub use config::{McpConfig, PlaygroundSettings, ServerLaunchConfig};
pub use mcp::{McpError, McpTool, Registry, ToolCallable};
pub use sanitize::Sanitizer;
