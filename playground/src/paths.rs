//! Path translation between host conventions
//!
//! The agent issuing tool calls and the tool server may see the same
//! filesystem through different conventions (a WSL shell driving a Windows
//! `npx.cmd`, for instance). Path-like arguments are rewritten into the
//! convention the child process expects. Everything here is a pure function
//! of the detected host, the target convention and the home directory.

use std::path::Path;

use serde_json::{Map, Value};

/// Where this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEnv {
    Windows,
    /// Linux under the Windows Subsystem for Linux
    Wsl,
    Linux,
    MacOs,
    Other,
}

impl HostEnv {
    pub fn detect() -> Self {
        if cfg!(windows) {
            HostEnv::Windows
        } else if cfg!(target_os = "macos") {
            HostEnv::MacOs
        } else if cfg!(target_os = "linux") {
            let has_mnt_c = Path::new("/mnt/c").exists();
            let proc_version = std::fs::read_to_string("/proc/version").unwrap_or_default();
            if is_wsl(has_mnt_c, &proc_version) {
                HostEnv::Wsl
            } else {
                HostEnv::Linux
            }
        } else {
            HostEnv::Other
        }
    }
}

/// WSL has the Windows drive mounted and says so in the kernel version string
pub fn is_wsl(has_mnt_c: bool, proc_version: &str) -> bool {
    let version = proc_version.to_ascii_lowercase();
    has_mnt_c && (version.contains("microsoft") || version.contains("wsl"))
}

/// Path convention a child process expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathConvention {
    Posix,
    Windows,
}

impl PathConvention {
    /// Windows when the host is Windows, or when a WSL host launches a
    /// Windows binary (`.cmd`/`.exe`, or anything under `/mnt/`)
    pub fn for_executable(host: HostEnv, executable: &Path) -> Self {
        match host {
            HostEnv::Windows => PathConvention::Windows,
            HostEnv::Wsl => {
                let lossy = executable.to_string_lossy().to_ascii_lowercase();
                if lossy.ends_with(".cmd") || lossy.ends_with(".exe") || lossy.starts_with("/mnt/")
                {
                    PathConvention::Windows
                } else {
                    PathConvention::Posix
                }
            }
            _ => PathConvention::Posix,
        }
    }
}

/// `C:\rest` or `c:/rest` → ('c', "rest")
fn drive_prefix(path: &str) -> Option<(char, &str)> {
    let mut chars = path.chars();
    let drive = chars.next()?;
    if !drive.is_ascii_alphabetic() || chars.next()? != ':' {
        return None;
    }
    match chars.next() {
        Some('\\') | Some('/') => Some((drive.to_ascii_lowercase(), &path[3..])),
        None => Some((drive.to_ascii_lowercase(), "")),
        _ => None,
    }
}

/// `/mnt/c/rest` → ('c', "rest")
fn mnt_prefix(path: &str) -> Option<(char, &str)> {
    let rest = path.strip_prefix("/mnt/")?;
    let mut chars = rest.chars();
    let drive = chars.next()?;
    if !drive.is_ascii_alphabetic() {
        return None;
    }
    match chars.next() {
        Some('/') => Some((drive.to_ascii_lowercase(), &rest[2..])),
        None => Some((drive.to_ascii_lowercase(), "")),
        _ => None,
    }
}

/// Parameter names that usually carry paths
pub fn is_path_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    ["path", "file", "dir", "folder", "location"]
        .iter()
        .any(|needle| key.contains(needle))
}

/// Values that look like filesystem paths
pub fn looks_like_path(value: &str) -> bool {
    value.starts_with('/')
        || value.starts_with("~/")
        || value.contains('\\')
        || drive_prefix(value).is_some()
}

/// Rewrites path-like strings into the child's convention
#[derive(Debug, Clone)]
pub struct PathTranslator {
    host: HostEnv,
    target: PathConvention,
    home: Option<String>,
}

impl PathTranslator {
    pub fn new(host: HostEnv, target: PathConvention) -> Self {
        Self {
            host,
            target,
            home: dirs::home_dir().map(|p| p.to_string_lossy().into_owned()),
        }
    }

    /// Override the home directory used for `~/` expansion
    pub fn with_home(mut self, home: Option<&str>) -> Self {
        self.home = home.map(str::to_string);
        self
    }

    pub fn target(&self) -> PathConvention {
        self.target
    }

    /// Translate a single path; anything unrecognized is returned unchanged
    pub fn translate_path(&self, path: &str) -> String {
        match self.target {
            PathConvention::Windows => match mnt_prefix(path) {
                Some((drive, rest)) => {
                    format!("{}:\\{}", drive.to_ascii_uppercase(), rest.replace('/', "\\"))
                }
                None => path.to_string(),
            },
            PathConvention::Posix => {
                if path == "~" || path.starts_with("~/") {
                    let home = self.home.as_deref();
                    return shellexpand::tilde_with_context(path, || home).into_owned();
                }
                if self.host == HostEnv::Wsl {
                    if let Some((drive, rest)) = drive_prefix(path) {
                        return format!("/mnt/{}/{}", drive, rest.replace('\\', "/"));
                    }
                }
                path.to_string()
            }
        }
    }

    /// Rewrite tool-call arguments whose key or value looks like a path.
    /// Arrays of strings under path-like keys are rewritten element-wise.
    pub fn translate_arguments(&self, arguments: &Map<String, Value>) -> Map<String, Value> {
        arguments
            .iter()
            .map(|(key, value)| {
                let path_key = is_path_key(key);
                let translated = match value {
                    Value::String(s) if path_key || looks_like_path(s) => {
                        let out = self.translate_path(s);
                        if &out != s {
                            tracing::debug!("Translated path argument '{}': {} -> {}", key, s, out);
                        }
                        Value::String(out)
                    }
                    Value::Array(items) if path_key => Value::Array(
                        items
                            .iter()
                            .map(|item| match item {
                                Value::String(s) => Value::String(self.translate_path(s)),
                                other => other.clone(),
                            })
                            .collect(),
                    ),
                    other => other.clone(),
                };
                (key.clone(), translated)
            })
            .collect()
    }

    /// Rewrite launch arguments that look like paths, leaving package
    /// specifiers (`@scope/pkg`) and flags alone
    pub fn translate_launch_args(&self, args: &[String]) -> Vec<String> {
        args.iter()
            .map(|arg| {
                let path_like = drive_prefix(arg).is_some()
                    || arg.starts_with("/mnt/")
                    || arg.starts_with("/home/")
                    || arg.contains('\\')
                    || arg.contains('/');
                if path_like && !arg.contains('@') && !arg.starts_with('-') {
                    self.translate_path(arg)
                } else {
                    arg.clone()
                }
            })
            .collect()
    }
}
