//! VM configuration (strand.toml)
//!
//! Backends are chosen here and nowhere else. An empty file is a valid
//! configuration: in-memory storage with one OS thread per invocation.
//!
//! ```toml
//! [runtime]
//! max_steps = 100000
//! poll_interval_ms = 5
//! result_timeout_ms = 30000
//!
//! [storage]
//! backend = "file"
//! path = "/var/lib/strand/run-1"
//!
//! [invoker]
//! backend = "process"
//! program = "/usr/local/bin/strand-worker"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Complete VM configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VmConfig {
    /// Execution limits and result polling
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Data controller backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Invoker backend
    #[serde(default)]
    pub invoker: InvokerConfig,
}

/// `[runtime]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// Per-thread instruction limit (default: unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u64>,

    /// How often to poll the root future while waiting (default: 10)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Give up waiting for the result after this long (default: never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_timeout_ms: Option<u64>,
}

fn default_poll_interval_ms() -> u64 {
    10
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_steps: None,
            poll_interval_ms: default_poll_interval_ms(),
            result_timeout_ms: None,
        }
    }
}

impl RuntimeConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Result timeout as a duration
    pub fn result_timeout(&self) -> Option<Duration> {
        self.result_timeout_ms.map(Duration::from_millis)
    }
}

/// Storage backend kind
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// [`crate::store::MemoryStore`]
    #[default]
    Memory,
    /// [`crate::store::FileStore`]
    File,
}

/// `[storage]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Backend kind
    #[serde(default)]
    pub backend: StorageBackend,

    /// Store directory (file backend)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Invoker backend kind
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InvokerBackend {
    /// [`crate::invoker::ThreadInvoker`]
    #[default]
    Thread,
    /// [`crate::invoker::PoolInvoker`]
    Pool,
    /// [`crate::invoker::ProcessInvoker`]
    Process,
}

/// `[invoker]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvokerConfig {
    /// Backend kind
    #[serde(default)]
    pub backend: InvokerBackend,

    /// Worker threads (pool backend, default: 4)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Worker binary (process backend)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,
}

fn default_workers() -> usize {
    4
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            backend: InvokerBackend::default(),
            workers: default_workers(),
            program: None,
        }
    }
}

impl VmConfig {
    /// Load and validate a config from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse and validate a config from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: VmConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.poll_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.storage.backend == StorageBackend::File && self.storage.path.is_none() {
            return Err(ConfigError::ValidationError(
                "storage.path is required for the file backend".to_string(),
            ));
        }

        match self.invoker.backend {
            InvokerBackend::Thread => {}
            InvokerBackend::Pool => {
                if self.invoker.workers == 0 {
                    return Err(ConfigError::ValidationError(
                        "invoker.workers must be greater than zero".to_string(),
                    ));
                }
            }
            InvokerBackend::Process => {
                if self.storage.backend != StorageBackend::File {
                    return Err(ConfigError::ValidationError(
                        "the process invoker requires the file storage backend".to_string(),
                    ));
                }
                if self.invoker.program.is_none() {
                    return Err(ConfigError::ValidationError(
                        "invoker.program is required for the process backend".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}
