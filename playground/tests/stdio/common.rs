//! Shared fixtures

use std::path::{Path, PathBuf};
use std::time::Duration;

use mcp_playground::config::{RuntimeSettings, ServerLaunchConfig};
use mcp_playground::{CapabilityCache, Registry, Sanitizer};
use serde_json::{Map, Value};
use tempfile::TempDir;

/// Scratch directory holding the cache and the stub's counter file
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    pub fn counter_file(&self) -> PathBuf {
        self.dir.path().join("tools_list.count")
    }

    /// How many `tools/list` requests the stub has served
    pub fn list_count(&self) -> usize {
        std::fs::read_to_string(self.counter_file())
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    /// Launch config for the stub, wired to this fixture's counter file
    pub fn stub(&self, name: &str) -> ServerLaunchConfig {
        ServerLaunchConfig::new(name, env!("CARGO_BIN_EXE_stub-echo")).with_env(
            "STUB_COUNTER_FILE",
            self.counter_file().to_string_lossy().into_owned(),
        )
    }

    pub fn registry(&self) -> Registry {
        self.registry_with(runtime(), Duration::from_secs(3600), Sanitizer::default())
    }

    pub fn registry_with(
        &self,
        runtime: RuntimeSettings,
        ttl: Duration,
        sanitizer: Sanitizer,
    ) -> Registry {
        Registry::with_parts(runtime, cache_at(&self.cache_dir(), ttl), sanitizer)
    }
}

pub fn cache_at(dir: &Path, ttl: Duration) -> CapabilityCache {
    CapabilityCache::new(dir, ttl)
}

/// Short timeouts so failing tests fail fast
pub fn runtime() -> RuntimeSettings {
    RuntimeSettings {
        init_timeout_secs: 10,
        call_timeout_secs: 10,
        list_timeout_secs: 10,
        startup_grace_ms: 200,
        stop_timeout_secs: 2,
        max_parallel_starts: 4,
    }
}

pub fn args(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
