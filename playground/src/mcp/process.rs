//! Process supervisor
//!
//! Owns one child tool server: executable resolution, spawn with piped
//! stdio, stderr draining, the startup liveness check and graceful stop.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::BufReader;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::error::McpError;
use super::transport::{read_line_bounded, LineRead};
use crate::config::{RuntimeSettings, ServerLaunchConfig};
use crate::paths::{HostEnv, PathConvention, PathTranslator};

/// Number of stderr lines kept for startup diagnostics
const STDERR_TAIL_LINES: usize = 50;

/// Longest stderr line kept; diagnostics never need more
const MAX_STDERR_LINE: usize = 64 * 1024;

/// How long to wait for the stderr drain to catch up after an early exit
const STDERR_SETTLE: Duration = Duration::from_millis(500);

/// Launchers that ship with Node and often live outside PATH
const NODE_LAUNCHERS: &[&str] = &["npx", "npm", "node"];

/// Knobs for spawning and stopping
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub startup_grace: Duration,
    pub stop_timeout: Duration,
    pub host: HostEnv,
}

impl ProcessOptions {
    pub fn from_settings(runtime: &RuntimeSettings, host: HostEnv) -> Self {
        Self {
            startup_grace: runtime.startup_grace(),
            stop_timeout: runtime.stop_timeout(),
            host,
        }
    }
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self::from_settings(&RuntimeSettings::default(), HostEnv::detect())
    }
}

/// Protocol pipes handed to the RPC client
pub struct ProcessPipes {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// A running child tool server
pub struct ServerProcess {
    name: String,
    child: Mutex<Option<Child>>,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    stop_timeout: Duration,
    translator: PathTranslator,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_task: JoinHandle<()>,
}

impl ServerProcess {
    /// Spawn the server and confirm it survives the startup grace period
    pub async fn start(
        config: &ServerLaunchConfig,
        options: &ProcessOptions,
    ) -> Result<(Self, ProcessPipes), McpError> {
        let executable = resolve_command(&config.name, &config.command, options.host)?;
        let target = PathConvention::for_executable(options.host, &executable);
        let translator = PathTranslator::new(options.host, target);
        let args = translator.translate_launch_args(&config.args);

        tracing::debug!(
            "Spawning MCP server '{}': {} {:?}",
            config.name,
            executable.display(),
            args
        );

        let mut cmd = Command::new(&executable);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("NODE_NO_WARNINGS", "1");
        // Merged over the inherited environment, not replacing it
        for (key, value) in &config.env {
            let expanded = shellexpand::env(value).unwrap_or_else(|_| value.clone().into());
            cmd.env(key, &*expanded);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                McpError::CommandNotFound {
                    server: config.name.clone(),
                    command: config.command.clone(),
                }
            } else {
                McpError::SpawnFailed {
                    server: config.name.clone(),
                    source: e,
                }
            }
        })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(McpError::SpawnFailed {
                server: config.name.clone(),
                source: std::io::Error::other("child stdio pipes unavailable"),
            });
        };

        let stderr_tail = Arc::new(Mutex::new(VecDeque::new()));
        let stderr_task = spawn_stderr_drain(config.name.clone(), stderr, stderr_tail.clone());

        tokio::time::sleep(options.startup_grace).await;

        match child.try_wait() {
            Ok(Some(status)) => {
                // The pipe is closed now, so the drain finishes on its own
                if tokio::time::timeout(STDERR_SETTLE, stderr_task).await.is_err() {
                    tracing::debug!("[{}] stderr drain did not settle", config.name);
                }
                let stderr = stderr_tail
                    .lock()
                    .await
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("\n");
                tracing::error!(
                    "MCP server '{}' exited during startup ({})",
                    config.name,
                    status
                );
                return Err(McpError::StartupFailed {
                    server: config.name.clone(),
                    status: status.to_string(),
                    stderr,
                });
            }
            Ok(None) => {}
            Err(e) => {
                return Err(McpError::SpawnFailed {
                    server: config.name.clone(),
                    source: e,
                })
            }
        }

        let pid = child.id();
        tracing::info!("Started MCP server '{}' (pid {:?})", config.name, pid);

        let process = Self {
            name: config.name.clone(),
            child: Mutex::new(Some(child)),
            pid,
            started_at: Utc::now(),
            stop_timeout: options.stop_timeout,
            translator,
            stderr_tail,
            stderr_task,
        };
        Ok((process, ProcessPipes { stdin, stdout }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Translator for the child's path convention
    pub fn translator(&self) -> &PathTranslator {
        &self.translator
    }

    /// Whether the child has not exited (and has not been stopped)
    pub async fn is_alive(&self) -> bool {
        match self.child.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Most recent stderr lines, oldest first
    pub async fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail.lock().await.iter().cloned().collect()
    }

    /// Terminate gracefully, then kill after the stop timeout.
    ///
    /// Idempotent: stopping an exited or already-stopped process is a no-op.
    pub async fn stop(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };

        if let Ok(Some(status)) = child.try_wait() {
            tracing::debug!("MCP server '{}' had already exited ({})", self.name, status);
            return;
        }

        terminate(&mut child);

        match tokio::time::timeout(self.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!("Stopped MCP server '{}' ({})", self.name, status);
            }
            Ok(Err(e)) => {
                tracing::warn!("Error waiting for MCP server '{}': {}", self.name, e);
            }
            Err(_) => {
                tracing::warn!(
                    "MCP server '{}' did not exit within {:?}, killing",
                    self.name,
                    self.stop_timeout
                );
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill MCP server '{}': {}", self.name, e);
                }
            }
        }
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        // The child itself is reaped by kill_on_drop
        self.stderr_task.abort();
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    match child.id() {
        Some(pid) => {
            // SAFETY: plain signal send to a pid we own; no memory is shared
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                tracing::debug!("SIGTERM to pid {} failed, killing", pid);
                let _ = child.start_kill();
            }
        }
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

/// Stderr lines mentioning errors or exceptions; logging level only
pub(crate) fn is_error_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("error") || lower.contains("exception")
}

fn spawn_stderr_drain(
    server: String,
    stderr: ChildStderr,
    tail: Arc<Mutex<VecDeque<String>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();

        loop {
            match read_line_bounded(&mut reader, &mut buf, MAX_STDERR_LINE).await {
                Ok(LineRead::Eof) => break,
                Ok(LineRead::Oversized(len)) => {
                    tracing::debug!("[{}] dropping {} byte stderr line", server, len);
                }
                Ok(LineRead::Line) => {
                    let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    if is_error_line(&line) {
                        tracing::error!("[{}] {}", server, line);
                    } else {
                        tracing::debug!("[{}] {}", server, line);
                    }

                    let mut tail = tail.lock().await;
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                Err(e) => {
                    tracing::debug!("[{}] error reading stderr: {}", server, e);
                    break;
                }
            }
        }
    })
}

/// Resolve a launch command to an executable path
///
/// Commands containing a separator must exist as given. Bare names go
/// through PATH; Node launchers additionally try their `.cmd` form and the
/// usual install locations.
pub fn resolve_command(server: &str, command: &str, host: HostEnv) -> Result<PathBuf, McpError> {
    let not_found = || McpError::CommandNotFound {
        server: server.to_string(),
        command: command.to_string(),
    };

    let path = Path::new(command);
    if path.is_absolute() || path.components().count() > 1 {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(not_found())
        };
    }

    if let Ok(found) = which::which(command) {
        return Ok(found);
    }

    if NODE_LAUNCHERS.contains(&command) {
        if let Ok(found) = which::which(format!("{}.cmd", command)) {
            return Ok(found);
        }

        let home = dirs::home_dir();
        let appdata = std::env::var_os("APPDATA").map(PathBuf::from);
        let candidates =
            node_launcher_candidates(command, host, home.as_deref(), appdata.as_deref());
        for candidate in candidates {
            if candidate.is_file() {
                tracing::debug!("Resolved '{}' to {}", command, candidate.display());
                return Ok(candidate);
            }
        }
    }

    Err(not_found())
}

/// Install locations to probe for a Node launcher, most specific first
pub fn node_launcher_candidates(
    command: &str,
    host: HostEnv,
    home: Option<&Path>,
    appdata: Option<&Path>,
) -> Vec<PathBuf> {
    let windows_name = if command == "node" {
        "node.exe".to_string()
    } else {
        format!("{}.cmd", command)
    };

    let mut candidates = Vec::new();
    match host {
        HostEnv::Windows => {
            candidates.push(PathBuf::from(r"C:\Program Files\nodejs").join(&windows_name));
            candidates.push(PathBuf::from(r"C:\Program Files (x86)\nodejs").join(&windows_name));
            if let Some(appdata) = appdata {
                candidates.push(appdata.join("npm").join(&windows_name));
            }
        }
        _ => {
            candidates.push(PathBuf::from("/usr/local/bin").join(command));
            candidates.push(PathBuf::from("/opt/homebrew/bin").join(command));
            if let Some(home) = home {
                candidates.push(home.join(".volta/bin").join(command));
                candidates.push(home.join(".local/bin").join(command));
            }
            if host == HostEnv::Wsl {
                candidates.push(PathBuf::from("/mnt/c/Program Files/nodejs").join(&windows_name));
                candidates
                    .push(PathBuf::from("/mnt/c/Program Files (x86)/nodejs").join(&windows_name));
            }
        }
    }
    candidates
}
