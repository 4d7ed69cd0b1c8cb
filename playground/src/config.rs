//! Configuration loading
//!
//! Two files are involved:
//! - the server list (`.mcp.json`, Claude Desktop format)
//! - runtime settings (`.playground.toml`), all optional with defaults

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Directory name used under the platform config/cache dirs
pub const APP_DIR_NAME: &str = "gradio-mcp-playground";

/// Environment toggle that disables every cache read and write
pub const DISABLE_CACHE_ENV: &str = "GMP_DISABLE_CACHE";

/// Find a config file by walking up the directory tree, then checking global locations.
///
/// Search order:
/// 1. Current directory and parent directories (walking up to root)
/// 2. Each of `globals`, in order
///
/// Returns the path if found, None otherwise.
fn find_config_file(filename: &str, globals: &[PathBuf]) -> Option<PathBuf> {
    if let Ok(mut current) = std::env::current_dir() {
        loop {
            let candidate = current.join(filename);
            if candidate.exists() {
                return Some(candidate);
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }
    }

    globals.iter().find(|path| path.exists()).cloned()
}

fn global_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mcp-playground"))
}

// ============================================================================
// Server launch configuration
// ============================================================================

/// How to launch one tool server
///
/// Immutable once the server is started. Cache identity is
/// [`fingerprint`](Self::fingerprint), which deliberately ignores `env`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerLaunchConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ServerLaunchConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Stable 16-hex-digit hash over `{command, args}`
    ///
    /// The environment is excluded: it may carry secrets and is not expected
    /// to change the advertised tool list.
    pub fn fingerprint(&self) -> String {
        // serde_json's default map is ordered, so the encoding is stable
        let stable = serde_json::json!({
            "command": self.command,
            "args": self.args,
        });
        let digest = Sha256::digest(stable.to_string().as_bytes());
        let hex = format!("{:x}", digest);
        hex[..16].to_string()
    }
}

/// MCP server configuration (from .mcp.json)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct McpConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: HashMap<String, McpServerEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpServerEntry {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Skip this server when starting everything
    #[serde(default)]
    pub disabled: bool,
}

impl McpConfig {
    /// Load the server list
    ///
    /// Search order:
    /// 1. Walk up directory tree from cwd looking for .mcp.json
    /// 2. ~/.gradio-mcp/mcp_servers.json
    /// 3. <config_dir>/mcp-playground/.mcp.json
    pub fn load() -> Result<Option<Self>> {
        let mut globals = Vec::new();
        if let Some(home) = dirs::home_dir() {
            globals.push(home.join(".gradio-mcp").join("mcp_servers.json"));
        }
        if let Some(dir) = global_config_dir() {
            globals.push(dir.join(".mcp.json"));
        }

        if let Some(config_path) = find_config_file(".mcp.json", &globals) {
            tracing::debug!("Loading MCP config from: {}", config_path.display());
            return Self::load_from_path(&config_path).map(Some);
        }

        tracing::debug!("No .mcp.json found");
        Ok(None)
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: McpConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Launch config for one server
    pub fn get(&self, name: &str) -> Option<ServerLaunchConfig> {
        self.mcp_servers
            .get(name)
            .map(|entry| entry.to_launch_config(name))
    }

    /// Launch configs for every enabled server, sorted by name
    pub fn launch_configs(&self) -> Vec<ServerLaunchConfig> {
        let mut configs: Vec<_> = self
            .mcp_servers
            .iter()
            .filter(|(_, entry)| !entry.disabled)
            .map(|(name, entry)| entry.to_launch_config(name))
            .collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        configs
    }
}

impl McpServerEntry {
    fn to_launch_config(&self, name: &str) -> ServerLaunchConfig {
        ServerLaunchConfig {
            name: name.to_string(),
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
        }
    }
}

// ============================================================================
// Runtime settings (.playground.toml)
// ============================================================================

/// Top-level settings file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaygroundSettings {
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub sanitizer: SanitizerSettings,
}

/// Timeouts and concurrency bounds for child servers
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_list_timeout_secs")]
    pub list_timeout_secs: u64,
    /// How long a fresh process must stay alive to count as started
    #[serde(default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,
    /// How long `stop` waits after the terminate signal before killing
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    #[serde(default = "default_max_parallel_starts")]
    pub max_parallel_starts: usize,
}

/// Capability cache settings
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Override for the platform cache directory
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Output bounds applied to tool results
#[derive(Debug, Clone, Deserialize)]
pub struct SanitizerSettings {
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
    #[serde(default = "default_image_threshold")]
    pub image_threshold: usize,
}

// Default value functions
fn default_init_timeout_secs() -> u64 {
    10
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_list_timeout_secs() -> u64 {
    30
}

fn default_startup_grace_ms() -> u64 {
    500
}

fn default_stop_timeout_secs() -> u64 {
    5
}

fn default_max_parallel_starts() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_ttl_secs() -> u64 {
    86_400
}

fn default_max_output_chars() -> usize {
    15_000
}

fn default_image_threshold() -> usize {
    1_000
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            init_timeout_secs: default_init_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            list_timeout_secs: default_list_timeout_secs(),
            startup_grace_ms: default_startup_grace_ms(),
            stop_timeout_secs: default_stop_timeout_secs(),
            max_parallel_starts: default_max_parallel_starts(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_ttl_secs(),
            dir: None,
        }
    }
}

impl Default for SanitizerSettings {
    fn default() -> Self {
        Self {
            max_output_chars: default_max_output_chars(),
            image_threshold: default_image_threshold(),
        }
    }
}

impl RuntimeSettings {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Enabled in the file and not switched off through `GMP_DISABLE_CACHE`
    pub fn is_enabled(&self) -> bool {
        self.enabled && !cache_disabled_by_env()
    }

    /// Configured directory, or the platform cache dir
    /// (XDG on Linux, Library/Caches on macOS, AppData\Local on Windows)
    pub fn resolved_dir(&self) -> PathBuf {
        match &self.dir {
            Some(dir) => PathBuf::from(shellexpand::tilde(&dir.to_string_lossy()).into_owned()),
            None => dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_DIR_NAME),
        }
    }
}

/// `GMP_DISABLE_CACHE=1` (or `true`/`yes`) turns the cache off
pub fn cache_disabled_by_env() -> bool {
    is_truthy(std::env::var(DISABLE_CACHE_ENV).ok().as_deref())
}

fn is_truthy(value: Option<&str>) -> bool {
    value.is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

impl PlaygroundSettings {
    /// Load settings from .playground.toml
    ///
    /// Search order:
    /// 1. Walk up directory tree from cwd looking for .playground.toml
    /// 2. Check <config_dir>/mcp-playground/.playground.toml
    /// 3. Fall back to defaults
    pub fn load() -> Result<Self> {
        let globals: Vec<PathBuf> = global_config_dir()
            .map(|dir| dir.join(".playground.toml"))
            .into_iter()
            .collect();

        if let Some(path) = find_config_file(".playground.toml", &globals) {
            tracing::debug!("Loading settings from: {}", path.display());
            return Self::load_from_path(&path);
        }

        tracing::debug!("No .playground.toml found, using defaults");
        Ok(Self::default())
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let settings: PlaygroundSettings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(settings)
    }
}
