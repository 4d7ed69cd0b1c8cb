//! On-disk capability cache
//!
//! Layout under the cache directory:
//!
//! ```text
//! index.json                      # {key: {server_name, fingerprint, cached_at}}
//! servers/{server}_{fp}.json      # CacheEntry
//! ```
//!
//! The index carries the timestamps used for TTL checks; entry files carry
//! the tool lists. Every write goes to a temp file first and is renamed into
//! place, so readers never see a half-written file. Secret-looking values are
//! masked before anything touches the disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mcp_common::ToolDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::{cache_disabled_by_env, CacheSettings, ServerLaunchConfig};

/// Replacement for masked values
pub const MASK: &str = "***MASKED***";

/// Key fragments that mark a value as secret
const SENSITIVE_KEYS: &[&str] = &["token", "key", "secret", "password", "api_key"];

const INDEX_FILE: &str = "index.json";
const SERVERS_DIR: &str = "servers";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cache file {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One server's discovered tools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub server_name: String,
    pub fingerprint: String,
    pub tools: Vec<ToolDescriptor>,
    pub cached_at: DateTime<Utc>,
    /// Launch config snapshot with secrets masked
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexRecord {
    server_name: String,
    fingerprint: String,
    cached_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    #[serde(default)]
    entries: BTreeMap<String, IndexRecord>,
}

/// Summary for `cache stats`
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub dir: PathBuf,
    pub entries: usize,
    pub total_bytes: u64,
}

/// Whether a key name looks like it holds a secret
pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|needle| key.contains(needle))
}

/// Mask scalar values under sensitive keys, recursing through objects and arrays
pub fn mask_sensitive(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    let masked = match inner {
                        Value::Object(_) | Value::Array(_) => mask_sensitive(inner),
                        _ if is_sensitive_key(key) => Value::String(MASK.to_string()),
                        _ => inner.clone(),
                    };
                    (key.clone(), masked)
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(mask_sensitive).collect()),
        other => other.clone(),
    }
}

/// File-name-safe version of a server name
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn entry_key(server_name: &str, fingerprint: &str) -> String {
    format!("{}_{}", sanitize_name(server_name), fingerprint)
}

fn age_of(cached_at: DateTime<Utc>) -> Duration {
    // Timestamps from the future (clock skew) count as brand new
    (Utc::now() - cached_at).to_std().unwrap_or(Duration::ZERO)
}

/// Tool-list cache keyed by server name and config fingerprint
pub struct CapabilityCache {
    dir: PathBuf,
    ttl: Duration,
    enabled: bool,
    // Serializes index read-modify-write cycles within this process
    index_lock: Mutex<()>,
}

impl CapabilityCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            enabled: true,
            index_lock: Mutex::new(()),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.resolved_dir(), settings.ttl()).with_enabled(settings.is_enabled())
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Enabled here and not switched off through `GMP_DISABLE_CACHE`.
    /// The variable is consulted on every read and write.
    pub fn is_enabled(&self) -> bool {
        self.enabled && !cache_disabled_by_env()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn servers_dir(&self) -> PathBuf {
        self.dir.join(SERVERS_DIR)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.servers_dir().join(format!("{}.json", key))
    }

    /// Valid entry for this exact config, or `None` on any kind of miss
    pub async fn get(&self, server_name: &str, config: &ServerLaunchConfig) -> Option<CacheEntry> {
        if !self.is_enabled() {
            return None;
        }

        let fingerprint = config.fingerprint();
        let key = entry_key(server_name, &fingerprint);

        let index = match self.read_index().await {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!("Ignoring unreadable cache index: {}", e);
                return None;
            }
        };

        let Some(record) = index.entries.get(&key) else {
            tracing::debug!("Cache miss for '{}' ({})", server_name, fingerprint);
            return None;
        };

        let age = age_of(record.cached_at);
        if age >= self.ttl {
            tracing::debug!(
                "Cache entry for '{}' expired ({}s old)",
                server_name,
                age.as_secs()
            );
            return None;
        }

        let path = self.entry_path(&key);
        let entry: CacheEntry = match read_json(&path).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::debug!("Cache entry file missing: {}", path.display());
                return None;
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable cache entry: {}", e);
                return None;
            }
        };

        if entry.fingerprint != fingerprint || entry.server_name != server_name {
            tracing::debug!("Cache entry for '{}' does not match config", server_name);
            return None;
        }

        tracing::debug!(
            "Cache hit for '{}' ({} tools)",
            server_name,
            entry.tools.len()
        );
        Some(entry)
    }

    /// Store a freshly discovered tool list, replacing older fingerprints
    pub async fn put(
        &self,
        server_name: &str,
        config: &ServerLaunchConfig,
        tools: &[ToolDescriptor],
    ) -> Result<(), CacheError> {
        if !self.is_enabled() {
            return Ok(());
        }

        let fingerprint = config.fingerprint();
        let key = entry_key(server_name, &fingerprint);
        let snapshot = serde_json::json!({
            "command": config.command,
            "args": config.args,
            "env": config.env,
        });
        let entry = CacheEntry {
            server_name: server_name.to_string(),
            fingerprint: fingerprint.clone(),
            tools: tools
                .iter()
                .map(|tool| ToolDescriptor {
                    input_schema: mask_sensitive(&tool.input_schema),
                    ..tool.clone()
                })
                .collect(),
            cached_at: Utc::now(),
            config: mask_sensitive(&snapshot),
        };

        let servers_dir = self.servers_dir();
        tokio::fs::create_dir_all(&servers_dir)
            .await
            .map_err(io_err(&servers_dir))?;

        let path = self.entry_path(&key);
        write_json_atomic(&path, &entry).await?;

        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index().await.unwrap_or_else(|e| {
            tracing::warn!("Rebuilding unreadable cache index: {}", e);
            CacheIndex::default()
        });

        let stale: Vec<String> = index
            .entries
            .iter()
            .filter(|(k, r)| r.server_name == server_name && **k != key)
            .map(|(k, _)| k.clone())
            .collect();
        for stale_key in stale {
            index.entries.remove(&stale_key);
            remove_if_exists(&self.entry_path(&stale_key)).await?;
        }

        index.entries.insert(
            key,
            IndexRecord {
                server_name: server_name.to_string(),
                fingerprint,
                cached_at: entry.cached_at,
            },
        );
        write_json_atomic(&self.index_path(), &index).await?;

        tracing::debug!("Cached {} tools for '{}'", tools.len(), server_name);
        Ok(())
    }

    /// Drop one server's entries (any fingerprint), or everything.
    /// Returns the number of entry files removed.
    pub async fn invalidate(&self, server_name: Option<&str>) -> Result<usize, CacheError> {
        let _guard = self.index_lock.lock().await;

        let Some(server_name) = server_name else {
            let removed = self.entry_files().await?.len();
            let servers_dir = self.servers_dir();
            if servers_dir.exists() {
                tokio::fs::remove_dir_all(&servers_dir)
                    .await
                    .map_err(io_err(&servers_dir))?;
            }
            remove_if_exists(&self.index_path()).await?;
            tracing::info!("Cleared capability cache ({} entries)", removed);
            return Ok(removed);
        };

        let wanted = sanitize_name(server_name);
        let mut removed = 0;
        for (path, _) in self.entry_files().await? {
            let matches = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.rsplit_once('_'))
                .is_some_and(|(name, _)| name == wanted);
            if matches {
                remove_if_exists(&path).await?;
                removed += 1;
            }
        }

        if let Ok(mut index) = self.read_index().await {
            let before = index.entries.len();
            index.entries.retain(|_, r| r.server_name != server_name);
            if index.entries.len() != before {
                write_json_atomic(&self.index_path(), &index).await?;
            }
        }

        tracing::info!(
            "Invalidated {} cache entries for '{}'",
            removed,
            server_name
        );
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let files = self.entry_files().await?;
        Ok(CacheStats {
            enabled: self.is_enabled(),
            dir: self.dir.clone(),
            entries: files.len(),
            total_bytes: files.iter().map(|(_, size)| size).sum(),
        })
    }

    async fn read_index(&self) -> Result<CacheIndex, CacheError> {
        Ok(read_json(&self.index_path()).await?.unwrap_or_default())
    }

    /// Entry files with their sizes
    async fn entry_files(&self) -> Result<Vec<(PathBuf, u64)>, CacheError> {
        let dir = self.servers_dir();
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&dir)(e)),
        };

        let mut files = Vec::new();
        while let Some(dirent) = read_dir.next_entry().await.map_err(io_err(&dir))? {
            let path = dirent.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let size = dirent.metadata().await.map(|m| m.len()).unwrap_or(0);
                files.push((path, size));
            }
        }
        Ok(files)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, CacheError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path)(e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| CacheError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Write to a sibling temp file, then rename over the target
async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| CacheError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(io_err(parent))?;
    }
    tokio::fs::write(&tmp, &bytes).await.map_err(io_err(&tmp))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(path)(e));
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<(), CacheError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path)(e)),
    }
}
