//! Error taxonomy for the supervisor, RPC client and registry

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced to callers of the MCP core
///
/// Nothing here is retried internally: every variant reaches the immediate
/// caller, which decides whether to retry, restart or give up.
#[derive(Debug, Error)]
pub enum McpError {
    /// The launch command could not be resolved to an executable
    #[error("command not found for server '{server}': {command}")]
    CommandNotFound { server: String, command: String },

    /// Spawning failed for a reason other than a missing executable
    #[error("failed to spawn server '{server}': {source}")]
    SpawnFailed {
        server: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exited during the startup grace period
    #[error("server '{server}' exited during startup ({status}){}", stderr_suffix(.stderr))]
    StartupFailed {
        server: String,
        status: String,
        stderr: String,
    },

    /// `initialize` did not complete in time
    #[error("server '{server}' did not answer initialize within {timeout:?}")]
    InitTimeout { server: String, timeout: Duration },

    /// A request did not complete in time; the process is still usable
    #[error("'{method}' on server '{server}' timed out after {timeout:?}")]
    CallTimeout {
        server: String,
        method: String,
        timeout: Duration,
    },

    /// The server answered with a JSON-RPC error object
    #[error("server '{server}' returned error {code}: {message}")]
    ServerError {
        server: String,
        code: i64,
        message: String,
    },

    /// stdout reached EOF or the process was stopped while requests were pending
    #[error("connection to server '{server}' closed")]
    ConnectionClosed { server: String },

    /// A response arrived but its payload did not have the expected shape
    #[error("invalid response from server '{server}': {reason}")]
    InvalidResponse { server: String, reason: String },

    #[error("server '{0}' is already running")]
    DuplicateServer(String),

    #[error("server '{0}' is not registered")]
    UnknownServer(String),

    #[error("tool '{tool}' not found on server '{server}'")]
    UnknownTool { server: String, tool: String },

    /// A qualified tool name that isn't `server.tool`
    #[error("invalid tool name '{0}', expected '<server>.<tool>'")]
    InvalidToolName(String),
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!(": {}", stderr.trim())
    }
}

impl McpError {
    pub(crate) fn closed(server: &str) -> Self {
        McpError::ConnectionClosed {
            server: server.to_string(),
        }
    }

    /// Failures scoped to a single call, after which the process stays usable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            McpError::InitTimeout { .. }
                | McpError::CallTimeout { .. }
                | McpError::ServerError { .. }
                | McpError::InvalidResponse { .. }
                | McpError::UnknownTool { .. }
        )
    }

    /// Failures after which the server has to be restarted by the caller
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, McpError::ConnectionClosed { .. })
    }
}
