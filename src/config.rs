//! Server Configuration
//!
//! One YAML document describes a running server: the logger level, the
//! enabled transports with their endpoints (and TLS material for QUIC), the
//! named stores, and the batch-writer tuning block.
//!
//! ```yaml
//! logger:
//!   level: info
//! transports:
//!   - type: udp
//!     host: 127.0.0.1
//!     port: 4433
//!   - type: tcp
//!     host: 127.0.0.1
//!     port: 4434
//!   - type: uds
//!     path: /tmp/fluxkv.sock
//!   - type: quic
//!     host: 127.0.0.1
//!     port: 4435
//!     tls:
//!       cert_path: ./certs/cert.pem
//!       key_path: ./certs/key.pem
//! stores:
//!   - name: default
//!     path: ./data/default
//! writer:
//!   store: default
//!   max_batch: 512
//!   flush_interval_ms: 500
//!   workers: 15
//!   queue_capacity: 500000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::storage::WriterConfig;
use crate::transport::tls::TlsSettings;

/// Errors while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logger: LoggerConfig,
    #[serde(default)]
    pub transports: Vec<TransportConfig>,
    pub stores: Vec<StoreConfig>,
    #[serde(default)]
    pub writer: WriterSettings,
}

impl Config {
    /// Loads and parses a YAML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}

/// Logger settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggerConfig {
    /// A `tracing` filter directive, e.g. `info` or `fluxkv=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// One enabled transport endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Udp {
        host: String,
        port: u16,
    },
    Tcp {
        host: String,
        port: u16,
    },
    Uds {
        path: PathBuf,
    },
    Quic {
        host: String,
        port: u16,
        tls: TlsSettings,
    },
}

impl TransportConfig {
    /// The endpoint as a bindable address string.
    pub fn addr(&self) -> String {
        match self {
            TransportConfig::Udp { host, port }
            | TransportConfig::Tcp { host, port }
            | TransportConfig::Quic { host, port, .. } => format!("{host}:{port}"),
            TransportConfig::Uds { path } => path.display().to_string(),
        }
    }
}

/// One named store and its on-disk location.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub name: String,
    pub path: PathBuf,
}

/// Batch-writer tuning block.
#[derive(Debug, Clone, Deserialize)]
pub struct WriterSettings {
    /// Which named store the writer commits into.
    #[serde(default = "default_store_name")]
    pub store: String,
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl WriterSettings {
    /// The writer's runtime configuration.
    pub fn to_writer_config(&self) -> WriterConfig {
        WriterConfig {
            max_batch: self.max_batch,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            worker_count: self.workers,
            shard_queue_capacity: self.queue_capacity,
        }
    }
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            store: default_store_name(),
            max_batch: default_max_batch(),
            flush_interval_ms: default_flush_interval_ms(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_store_name() -> String {
    "default".to_string()
}

fn default_max_batch() -> usize {
    512
}

fn default_flush_interval_ms() -> u64 {
    500
}

fn default_workers() -> usize {
    15
}

fn default_queue_capacity() -> usize {
    500_000
}
