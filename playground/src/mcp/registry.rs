//! Connection registry
//!
//! A named collection of servers. Servers whose tool list is cached are
//! registered without spawning and started on first use; everything else is
//! spawned, initialized and discovered up front. Connections are never
//! restarted behind the caller's back: a dead server stays dead until
//! [`Registry::restart`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};

use super::client::McpClient;
use super::error::McpError;
use super::process::{ProcessOptions, ServerProcess};
use super::tool::{McpToolHandle, ToolCallable};
use super::types::{split_qualified, CacheStatus, McpTool, ServerInfo, ServerState, ServerStatus};
use crate::cache::{CacheError, CapabilityCache};
use crate::config::{PlaygroundSettings, RuntimeSettings, ServerLaunchConfig};
use crate::paths::HostEnv;
use crate::sanitize::Sanitizer;

/// A live process and the client speaking to it
struct Connection {
    process: ServerProcess,
    client: McpClient,
    info: ServerInfo,
}

impl Connection {
    async fn shutdown(&self) {
        self.process.stop().await;
        self.client.close().await;
    }

    async fn is_dead(&self) -> bool {
        self.client.is_closed().await || !self.process.is_alive().await
    }
}

enum Link {
    /// Known from the cache, not spawned yet
    Idle,
    Live(Arc<Connection>),
    Stopped,
}

struct ServerSlot {
    config: ServerLaunchConfig,
    tools: Vec<McpTool>,
    // Held across a lazy spawn so concurrent first calls spawn once
    link: Mutex<Link>,
}

/// Outcome of [`Registry::start_all`]
#[derive(Debug, Default)]
pub struct StartReport {
    /// `(server, tool count)` for each server that started
    pub started: Vec<(String, usize)>,
    pub failed: Vec<(String, McpError)>,
}

impl StartReport {
    pub fn all_started(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Registry {
    servers: RwLock<HashMap<String, Arc<ServerSlot>>>,
    cache: CapabilityCache,
    sanitizer: Sanitizer,
    runtime: RuntimeSettings,
    process_options: ProcessOptions,
    spawns: AtomicUsize,
}

impl Registry {
    pub fn new(settings: &PlaygroundSettings) -> Self {
        Self::with_parts(
            settings.runtime.clone(),
            CapabilityCache::from_settings(&settings.cache),
            Sanitizer::from_settings(&settings.sanitizer),
        )
    }

    pub fn with_parts(
        runtime: RuntimeSettings,
        cache: CapabilityCache,
        sanitizer: Sanitizer,
    ) -> Self {
        let process_options = ProcessOptions::from_settings(&runtime, HostEnv::detect());
        Self {
            servers: RwLock::new(HashMap::new()),
            cache,
            sanitizer,
            runtime,
            process_options,
            spawns: AtomicUsize::new(0),
        }
    }

    pub fn cache(&self) -> &CapabilityCache {
        &self.cache
    }

    /// Processes spawned by this registry so far
    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    /// Register a server and return its tools.
    ///
    /// A cache hit registers the server idle without spawning anything.
    pub async fn start(&self, config: &ServerLaunchConfig) -> Result<Vec<McpTool>, McpError> {
        if self.is_active(&config.name).await {
            return Err(McpError::DuplicateServer(config.name.clone()));
        }

        let slot = match self.cache.get(&config.name, config).await {
            Some(entry) => {
                tracing::info!(
                    "Registered '{}' from cache ({} tools), deferring spawn",
                    config.name,
                    entry.tools.len()
                );
                ServerSlot {
                    config: config.clone(),
                    tools: entry
                        .tools
                        .iter()
                        .map(|t| McpTool::from_descriptor(&config.name, t))
                        .collect(),
                    link: Mutex::new(Link::Idle),
                }
            }
            None => self.start_live(config).await?,
        };

        let tools = slot.tools.clone();
        self.insert(slot).await?;
        Ok(tools)
    }

    /// Start several servers, at most `max_parallel_starts` at a time.
    /// One failure never stops the others.
    pub async fn start_all(&self, configs: Vec<ServerLaunchConfig>) -> StartReport {
        let limit = self.runtime.max_parallel_starts.max(1);
        let results: Vec<(String, Result<Vec<McpTool>, McpError>)> = stream::iter(configs)
            .map(|config| async move {
                let outcome = self.start(&config).await;
                (config.name, outcome)
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut report = StartReport::default();
        for (name, outcome) in results {
            match outcome {
                Ok(tools) => report.started.push((name, tools.len())),
                Err(e) => {
                    tracing::error!("Failed to start MCP server '{}': {}", name, e);
                    report.failed.push((name, e));
                }
            }
        }
        report.started.sort_by(|a, b| a.0.cmp(&b.0));
        report.failed.sort_by(|a, b| a.0.cmp(&b.0));
        tracing::info!(
            "Started {} MCP servers ({} failed)",
            report.started.len(),
            report.failed.len()
        );
        report
    }

    /// Spawn, initialize, list, stop. Refreshes the cache and never registers.
    pub async fn probe(&self, config: &ServerLaunchConfig) -> Result<Vec<McpTool>, McpError> {
        let conn = self.connect(config).await?;
        let listed = conn.client.list_tools(self.runtime.list_timeout()).await;
        conn.shutdown().await;

        let descriptors = listed?;
        if let Err(e) = self.cache.put(&config.name, config, &descriptors).await {
            tracing::warn!("Failed to cache tools for '{}': {}", config.name, e);
        }
        Ok(descriptors
            .iter()
            .map(|t| McpTool::from_descriptor(&config.name, t))
            .collect())
    }

    /// Call `tool` on `server` and return the sanitized output
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<String, McpError> {
        let slot = self.slot(server).await?;
        if !slot.tools.iter().any(|t| t.name == tool) {
            return Err(McpError::UnknownTool {
                server: server.to_string(),
                tool: tool.to_string(),
            });
        }

        let conn = self.ensure_connection(&slot).await?;
        let arguments = conn.process.translator().translate_arguments(&arguments);
        let timeout = timeout.unwrap_or_else(|| self.runtime.call_timeout());

        tracing::debug!("Calling {}.{}", server, tool);
        let raw = conn.client.call_tool(tool, arguments, timeout).await?;
        Ok(self.sanitizer.sanitize_result(&raw))
    }

    /// Call by qualified name (`server.tool`)
    pub async fn call(
        &self,
        qualified: &str,
        arguments: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<String, McpError> {
        let (server, tool) = split_qualified(qualified)?;
        self.call_tool(server, tool, arguments, timeout).await
    }

    /// Every registered tool, sorted by qualified name
    pub async fn tools(&self) -> Vec<McpTool> {
        let servers = self.servers.read().await;
        let mut tools: Vec<McpTool> = servers
            .values()
            .flat_map(|slot| slot.tools.iter().cloned())
            .collect();
        tools.sort_by_key(|t| t.qualified_name());
        tools
    }

    pub async fn server_tools(&self, server: &str) -> Result<Vec<McpTool>, McpError> {
        Ok(self.slot(server).await?.tools.clone())
    }

    /// Tools wrapped as name-spaced callables
    pub async fn callables(self: &Arc<Self>) -> Vec<Arc<dyn ToolCallable>> {
        self.tools()
            .await
            .into_iter()
            .map(|tool| Arc::new(McpToolHandle::new(self.clone(), tool)) as Arc<dyn ToolCallable>)
            .collect()
    }

    /// Stop a server; returns whether a live process was stopped.
    /// Stopping a stopped server is a no-op.
    pub async fn stop(&self, server: &str) -> Result<bool, McpError> {
        let slot = self.slot(server).await?;
        let mut link = slot.link.lock().await;
        match std::mem::replace(&mut *link, Link::Stopped) {
            Link::Live(conn) => {
                conn.shutdown().await;
                tracing::info!("Stopped MCP server '{}'", server);
                Ok(true)
            }
            Link::Idle | Link::Stopped => Ok(false),
        }
    }

    pub async fn stop_all(&self) {
        let names: Vec<String> = self.servers.read().await.keys().cloned().collect();
        let stops = names.iter().map(|name| self.stop(name));
        for (name, outcome) in names.iter().zip(futures_util::future::join_all(stops).await) {
            if let Err(e) = outcome {
                tracing::warn!("Failed to stop MCP server '{}': {}", name, e);
            }
        }
    }

    /// Replace the server's process with a fresh one and rediscover its tools
    pub async fn restart(&self, server: &str) -> Result<Vec<McpTool>, McpError> {
        let config = self.slot(server).await?.config.clone();
        self.stop(server).await?;

        tracing::info!("Restarting MCP server '{}'", server);
        let slot = self.start_live(&config).await?;
        let tools = slot.tools.clone();
        self.insert(slot).await?;
        Ok(tools)
    }

    /// Per-server status, sorted by name
    pub async fn status(&self) -> Vec<ServerStatus> {
        let slots: Vec<Arc<ServerSlot>> = self.servers.read().await.values().cloned().collect();

        let mut statuses = Vec::with_capacity(slots.len());
        for slot in slots {
            let (state, pid, uptime_secs) = match &*slot.link.lock().await {
                Link::Idle => (ServerState::Idle, None, None),
                Link::Stopped => (ServerState::Stopped, None, None),
                Link::Live(conn) => {
                    let state = if conn.is_dead().await {
                        ServerState::Failed
                    } else {
                        ServerState::Running
                    };
                    let uptime = (Utc::now() - conn.process.started_at())
                        .to_std()
                        .map(|d| d.as_secs())
                        .ok();
                    (state, conn.process.pid(), uptime)
                }
            };
            let cache_status = if self.cache.get(&slot.config.name, &slot.config).await.is_some() {
                CacheStatus::Valid
            } else {
                CacheStatus::Unknown
            };
            statuses.push(ServerStatus {
                name: slot.config.name.clone(),
                state,
                tool_count: slot.tools.len(),
                cache_status,
                pid,
                uptime_secs,
            });
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// What the server reported at `initialize`, if it has been spawned
    pub async fn server_info(&self, server: &str) -> Result<Option<ServerInfo>, McpError> {
        let slot = self.slot(server).await?;
        let link = slot.link.lock().await;
        Ok(match &*link {
            Link::Live(conn) => Some(conn.info.clone()),
            _ => None,
        })
    }

    pub async fn invalidate_cache(&self, server: Option<&str>) -> Result<usize, CacheError> {
        self.cache.invalidate(server).await
    }

    async fn slot(&self, server: &str) -> Result<Arc<ServerSlot>, McpError> {
        self.servers
            .read()
            .await
            .get(server)
            .cloned()
            .ok_or_else(|| McpError::UnknownServer(server.to_string()))
    }

    /// Registered and not stopped
    async fn is_active(&self, server: &str) -> bool {
        let Some(slot) = self.servers.read().await.get(server).cloned() else {
            return false;
        };
        let link = slot.link.lock().await;
        !matches!(*link, Link::Stopped)
    }

    /// Insert a slot, replacing a stopped one. Loses to a concurrent start
    /// of the same name, in which case the new connection is shut down.
    async fn insert(&self, slot: ServerSlot) -> Result<(), McpError> {
        let name = slot.config.name.clone();
        let mut servers = self.servers.write().await;
        if let Some(existing) = servers.get(&name) {
            // A busy link is mid-spawn or mid-stop, so still in use
            let active = match existing.link.try_lock() {
                Ok(link) => !matches!(*link, Link::Stopped),
                Err(_) => true,
            };
            if active {
                drop(servers);
                if let Link::Live(conn) = &*slot.link.lock().await {
                    conn.shutdown().await;
                }
                return Err(McpError::DuplicateServer(name));
            }
        }
        servers.insert(name, Arc::new(slot));
        Ok(())
    }

    /// Spawn, initialize and discover; writes the cache
    async fn start_live(&self, config: &ServerLaunchConfig) -> Result<ServerSlot, McpError> {
        let conn = self.connect(config).await?;
        let descriptors = match conn.client.list_tools(self.runtime.list_timeout()).await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                conn.shutdown().await;
                return Err(e);
            }
        };

        if let Err(e) = self.cache.put(&config.name, config, &descriptors).await {
            tracing::warn!("Failed to cache tools for '{}': {}", config.name, e);
        }

        tracing::info!(
            "MCP server '{}' ready with {} tools",
            config.name,
            descriptors.len()
        );
        Ok(ServerSlot {
            config: config.clone(),
            tools: descriptors
                .iter()
                .map(|t| McpTool::from_descriptor(&config.name, t))
                .collect(),
            link: Mutex::new(Link::Live(conn)),
        })
    }

    /// Spawn and initialize
    async fn connect(&self, config: &ServerLaunchConfig) -> Result<Arc<Connection>, McpError> {
        let (process, pipes) = ServerProcess::start(config, &self.process_options).await?;
        self.spawns.fetch_add(1, Ordering::SeqCst);

        let client = McpClient::from_pipes(&config.name, pipes);
        match client.initialize(self.runtime.init_timeout()).await {
            Ok(info) => Ok(Arc::new(Connection {
                process,
                client,
                info,
            })),
            Err(e) => {
                process.stop().await;
                client.close().await;
                Err(e)
            }
        }
    }

    /// Live connection for a slot, spawning an idle server on first use
    async fn ensure_connection(&self, slot: &ServerSlot) -> Result<Arc<Connection>, McpError> {
        let mut link = slot.link.lock().await;
        match &*link {
            Link::Live(conn) => {
                if conn.client.is_closed().await {
                    return Err(McpError::closed(&slot.config.name));
                }
                Ok(conn.clone())
            }
            Link::Stopped => Err(McpError::closed(&slot.config.name)),
            Link::Idle => {
                tracing::info!("Lazily starting MCP server '{}'", slot.config.name);
                let conn = self.connect(&slot.config).await?;
                *link = Link::Live(conn.clone());
                Ok(conn)
            }
        }
    }
}
