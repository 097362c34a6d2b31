//! Configuration for the worker bridge

mod env_loader;
mod file_loader;
pub mod timeouts;

pub use env_loader::{ENV_HANDSHAKE_TIMEOUT_MS, ENV_PROBE_TIMEOUT_MS, ENV_WORKER_CWD, ENV_WORKER_PATH};
pub use file_loader::load_from_file;

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default cap on a single protocol line (8 MiB)
pub const DEFAULT_MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

fn default_handshake_timeout_ms() -> u64 {
    timeouts::HANDSHAKE_MS
}

fn default_probe_timeout_ms() -> u64 {
    timeouts::PROBE_MS
}

fn default_max_line_bytes() -> usize {
    DEFAULT_MAX_LINE_BYTES
}

fn default_program() -> String {
    "flowgen-worker".to_string()
}

fn default_settings() -> Value {
    Value::Object(Default::default())
}

/// How liveness probes are written to the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeFormat {
    /// `{"type":"ping"}`
    #[default]
    Json,
    /// A literal `PING` line, understood by early worker builds
    Bare,
}

/// How to launch the worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCommandConfig {
    /// Executable path
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments passed before any protocol traffic
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory; inherits the host's when unset
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Default for WorkerCommandConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
        }
    }
}

impl WorkerCommandConfig {
    /// Create a config for the given executable
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Add an argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the working directory
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (pretty, compact, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Worker launch settings
    #[serde(default)]
    pub worker: WorkerCommandConfig,
    /// Time allowed for the ready handshake
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Time allowed for each liveness probe
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Longest accepted protocol line
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Probe encoding
    #[serde(default)]
    pub probe_format: ProbeFormat,
    /// Generation settings sent with every run request
    #[serde(default = "default_settings")]
    pub settings: Value,
    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            worker: WorkerCommandConfig::default(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            max_line_bytes: default_max_line_bytes(),
            probe_format: ProbeFormat::default(),
            settings: default_settings(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Create a config for the given worker command
    pub fn new(worker: WorkerCommandConfig) -> Self {
        Self {
            worker,
            ..Self::default()
        }
    }

    /// Handshake timeout as Duration
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Probe timeout as Duration
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> BridgeResult<()> {
        env_loader::apply_overrides(self, |key| std::env::var(key).ok())
    }

    /// Check the config for values the bridge cannot work with
    pub fn validate(&self) -> BridgeResult<()> {
        if self.worker.program.trim().is_empty() {
            return Err(BridgeError::config("worker.program must not be empty"));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(BridgeError::config("handshake_timeout_ms must be greater than zero"));
        }
        if self.probe_timeout_ms == 0 {
            return Err(BridgeError::config("probe_timeout_ms must be greater than zero"));
        }
        if self.max_line_bytes == 0 {
            return Err(BridgeError::config("max_line_bytes must be greater than zero"));
        }
        if !self.settings.is_object() {
            return Err(BridgeError::config("settings must be a JSON object"));
        }
        Ok(())
    }
}
