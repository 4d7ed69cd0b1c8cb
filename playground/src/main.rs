use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use mcp_playground::config::{McpConfig, PlaygroundSettings};
use mcp_playground::mcp::{split_qualified, Registry};

#[derive(Parser)]
#[command(name = "mcp-playground")]
#[command(about = "Run MCP tool servers, list their tools and call them")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Server list (.mcp.json format); searched for when omitted
    #[arg(long, env = "GMP_CONFIG")]
    config: Option<PathBuf>,

    /// Runtime settings (.playground.toml); searched for when omitted
    #[arg(long, env = "GMP_SETTINGS")]
    settings: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List tools from the configured servers
    Tools {
        /// Only list tools from a specific server
        #[arg(long)]
        server: Option<String>,
    },
    /// Call a tool directly
    Call {
        /// Qualified tool name (server.tool)
        tool: String,
        /// Arguments as JSON
        #[arg(long, short)]
        args: Option<String>,
        /// Timeout in seconds (defaults to the configured call timeout)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Start a server just long enough to list its tools, then stop it
    Probe {
        /// Server name
        server: String,
    },
    /// Inspect or clear the capability cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show cache location and size
    Stats,
    /// Remove cached tool lists
    Clear {
        /// Only clear entries for this server
        #[arg(long)]
        server: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    mcp_common::init_tracing("mcp_playground")?;

    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => PlaygroundSettings::load_from_path(path)?,
        None => PlaygroundSettings::load()?,
    };

    match cli.command {
        Commands::Tools { server } => {
            let config = load_servers(cli.config.as_deref())?;
            run_tools(&config, &settings, server).await?;
        }
        Commands::Call {
            tool,
            args,
            timeout,
        } => {
            let config = load_servers(cli.config.as_deref())?;
            run_call_tool(&config, &settings, &tool, args, timeout).await?;
        }
        Commands::Probe { server } => {
            let config = load_servers(cli.config.as_deref())?;
            run_probe(&config, &settings, &server).await?;
        }
        Commands::Cache { action } => {
            run_cache(&settings, action).await?;
        }
    }

    Ok(())
}

fn load_servers(path: Option<&std::path::Path>) -> Result<McpConfig> {
    match path {
        Some(path) => McpConfig::load_from_path(path),
        None => McpConfig::load()?.ok_or_else(|| {
            anyhow::anyhow!(
                "No .mcp.json found in current directory or parents (or ~/.gradio-mcp/mcp_servers.json)"
            )
        }),
    }
}

async fn run_tools(
    config: &McpConfig,
    settings: &PlaygroundSettings,
    server_filter: Option<String>,
) -> Result<()> {
    let configs: Vec<_> = match &server_filter {
        Some(name) => vec![config
            .get(name)
            .with_context(|| format!("Server '{}' is not configured", name))?],
        None => config.launch_configs(),
    };

    let registry = Registry::new(settings);
    let report = registry.start_all(configs).await;
    for (server, error) in &report.failed {
        eprintln!("Failed to start '{}': {}", server, error);
    }

    let mut by_server: BTreeMap<String, Vec<_>> = BTreeMap::new();
    for tool in registry.tools().await {
        by_server.entry(tool.server.clone()).or_default().push(tool);
    }

    if by_server.is_empty() {
        println!("No tools found.");
    }
    for (server, tools) in by_server {
        println!("=== {} ({} tools) ===", server, tools.len());
        for tool in tools {
            let desc = tool.description.lines().next().unwrap_or("No description");
            println!("  {} - {}", tool.name, desc);
        }
        println!();
    }

    registry.stop_all().await;
    Ok(())
}

async fn run_call_tool(
    config: &McpConfig,
    settings: &PlaygroundSettings,
    qualified: &str,
    args: Option<String>,
    timeout: Option<u64>,
) -> Result<()> {
    let (server, _) = split_qualified(qualified)?;
    let launch = config
        .get(server)
        .with_context(|| format!("Server '{}' is not configured", server))?;

    let arguments: Map<String, Value> = match args {
        Some(raw) => serde_json::from_str(&raw).context("--args must be a JSON object")?,
        None => Map::new(),
    };

    let registry = Registry::new(settings);
    registry.start(&launch).await?;

    let outcome = registry
        .call(qualified, arguments, timeout.map(Duration::from_secs))
        .await;
    registry.stop_all().await;

    println!("{}", outcome?);
    Ok(())
}

async fn run_probe(config: &McpConfig, settings: &PlaygroundSettings, server: &str) -> Result<()> {
    let launch = config
        .get(server)
        .with_context(|| format!("Server '{}' is not configured", server))?;

    let registry = Registry::new(settings);
    let tools = registry.probe(&launch).await?;

    println!("=== {} ({} tools) ===", server, tools.len());
    for tool in tools {
        let desc = tool.description.lines().next().unwrap_or("No description");
        println!("  {} - {}", tool.name, desc);
    }
    Ok(())
}

async fn run_cache(settings: &PlaygroundSettings, action: CacheAction) -> Result<()> {
    let registry = Registry::new(settings);
    match action {
        CacheAction::Stats => {
            let stats = registry.cache().stats().await?;
            println!("Enabled:   {}", stats.enabled);
            println!("Directory: {}", stats.dir.display());
            println!("Entries:   {}", stats.entries);
            println!("Size:      {} bytes", stats.total_bytes);
        }
        CacheAction::Clear { server } => {
            let removed = registry.invalidate_cache(server.as_deref()).await?;
            match server {
                Some(name) => println!("Removed {} cache entries for '{}'", removed, name),
                None => println!("Removed {} cache entries", removed),
            }
        }
    }
    Ok(())
}
