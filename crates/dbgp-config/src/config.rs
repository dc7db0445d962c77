use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Log verbosity level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Where to wait for engines to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port; Xdebug connects to 9000 unless told otherwise.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    9000
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ListenConfig {
    /// `host:port`, ready for binding.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Per-session behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// IDE key expected from engines; only used for display and logs.
    #[serde(default = "default_ide_key")]
    pub ide_key: String,
    /// Stop on the first line of the script after connecting.
    #[serde(default = "default_true")]
    pub break_on_first_line: bool,
    /// Seconds to wait for each command's reply (1–3600).
    #[serde(default = "default_timeout")]
    pub command_timeout_secs: u64,
    /// Seconds to wait for `run`, `step_*` and `stop`; 0 waits until the
    /// script breaks or ends.
    #[serde(default)]
    pub continuation_timeout_secs: u64,
}

fn default_ide_key() -> String {
    "dbgp".to_string()
}
fn default_true() -> bool {
    true
}
fn default_timeout() -> u64 {
    10
}

impl SessionConfig {
    /// Continuation deadline, `None` when unbounded.
    pub fn continuation_timeout(&self) -> Option<Duration> {
        (self.continuation_timeout_secs > 0)
            .then(|| Duration::from_secs(self.continuation_timeout_secs))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ide_key: default_ide_key(),
            break_on_first_line: true,
            command_timeout_secs: default_timeout(),
            continuation_timeout_secs: 0,
        }
    }
}

/// Engine features applied with `feature_set` once a session is ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Nesting depth of properties in replies (0 = engine default).
    #[serde(default)]
    pub max_depth: u32,
    /// Bytes of a value sent before truncation.
    #[serde(default = "default_max_data")]
    pub max_data: u32,
    /// Children of a property sent per page.
    #[serde(default = "default_max_children")]
    pub max_children: u32,
}

fn default_max_data() -> u32 {
    1024
}
fn default_max_children() -> u32 {
    150
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            max_depth: 0,
            max_data: default_max_data(),
            max_children: default_max_children(),
        }
    }
}

impl FeatureConfig {
    /// `(feature name, value)` pairs in the order they are applied.
    pub fn pairs(&self) -> [(&'static str, u32); 3] {
        [
            ("max_depth", self.max_depth),
            ("max_data", self.max_data),
            ("max_children", self.max_children),
        ]
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
    /// Log file; defaults to `<data_dir>/logs/dbgp.log`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub log: LogConfig,
}
