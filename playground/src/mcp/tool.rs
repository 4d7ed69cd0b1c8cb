//! Consumer-facing tool callables
//!
//! Each discovered tool is exposed as `{server}.{tool}` taking a key-value
//! argument map and returning sanitized text.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::error::McpError;
use super::registry::Registry;
use super::types::McpTool;

/// A tool an agent can invoke by name
#[async_trait]
pub trait ToolCallable: Send + Sync {
    /// Qualified name, `{server}.{tool}`
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for the arguments
    fn parameters(&self) -> &Value;

    /// Invoke with the given arguments; output is already sanitized
    async fn call(&self, arguments: Map<String, Value>) -> Result<String, McpError>;
}

/// A registry tool bound to its registry
pub struct McpToolHandle {
    registry: Arc<Registry>,
    tool: McpTool,
    qualified: String,
}

impl McpToolHandle {
    pub fn new(registry: Arc<Registry>, tool: McpTool) -> Self {
        let qualified = tool.qualified_name();
        Self {
            registry,
            tool,
            qualified,
        }
    }

    pub fn tool(&self) -> &McpTool {
        &self.tool
    }
}

#[async_trait]
impl ToolCallable for McpToolHandle {
    fn name(&self) -> &str {
        &self.qualified
    }

    fn description(&self) -> &str {
        &self.tool.description
    }

    fn parameters(&self) -> &Value {
        &self.tool.input_schema
    }

    async fn call(&self, arguments: Map<String, Value>) -> Result<String, McpError> {
        self.registry
            .call_tool(&self.tool.server, &self.tool.name, arguments, None)
            .await
    }
}
