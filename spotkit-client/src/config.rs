//! Client configuration.
//!
//! ```yaml
//! client_name: arm-operator
//! default_timeout_ms: 10000
//! logging_control: enabled
//! poll_interval_ms: 50
//! chunk_size: 4194304
//! runtime_worker_threads: 2
//! log_level: debug
//! log_format: json
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::chunking::DEFAULT_CHUNK_SIZE;
use crate::params::{LoggingControl, RpcParameters};

/// Largest accepted chunk size (64 MiB).
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Configuration of one pump and the service clients built on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Name injected into every request header. Generated when empty.
    pub client_name: String,
    /// Client-level RPC timeout in milliseconds (0 = no deadline).
    pub default_timeout_ms: u64,
    pub logging_control: LoggingControl,
    /// How long the auto-update thread waits per poll.
    pub poll_interval_ms: u64,
    /// Frame size for chunked calls.
    pub chunk_size: usize,
    /// Worker threads of the runtime driving transport futures.
    pub runtime_worker_threads: usize,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: String::new(),
            default_timeout_ms: 30_000,
            logging_control: LoggingControl::Default,
            poll_interval_ms: 100,
            chunk_size: DEFAULT_CHUNK_SIZE,
            runtime_worker_threads: 2,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Invalid configuration values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("chunk_size {0} is outside 1..={} bytes", MAX_CHUNK_SIZE)]
    ChunkSize(usize),

    #[error("poll_interval_ms must be greater than zero")]
    PollInterval,

    #[error("runtime_worker_threads must be greater than zero")]
    WorkerThreads,

    #[error("client_name must not contain control characters")]
    ClientName,
}

impl ClientConfig {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ClientConfig =
            serde_yaml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::ChunkSize(self.chunk_size));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::PollInterval);
        }
        if self.runtime_worker_threads == 0 {
            return Err(ConfigError::WorkerThreads);
        }
        if self.client_name.chars().any(char::is_control) {
            return Err(ConfigError::ClientName);
        }
        Ok(())
    }

    /// Client-level RPC parameters.
    pub fn rpc_parameters(&self) -> RpcParameters {
        RpcParameters::new(
            Duration::from_millis(self.default_timeout_ms),
            self.logging_control,
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The configured client name, or `<hostname>-<short uuid>`.
    pub fn effective_client_name(&self) -> String {
        if !self.client_name.is_empty() {
            return self.client_name.clone();
        }

        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", host, &id[..8])
    }

    /// Install the global tracing subscriber in the configured format.
    pub fn init_logging(&self) -> Result<()> {
        match self.log_format {
            LogFormat::Pretty => spotkit_common::init_logging(&self.log_level),
            LogFormat::Json => spotkit_common::init_logging_json(&self.log_level),
        }
    }
}
