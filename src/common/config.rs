//! Configuration for shardkv nodes

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::{Error, Result};

/// Prefix for environment overrides, e.g. `SHARDKV__WORKERS=16`
const ENV_PREFIX: &str = "SHARDKV";

/// Default config file name (extension resolved by the `config` crate)
const DEFAULT_CONFIG_FILE: &str = "shardkv";

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Public URL of this node, must appear in `cluster_urls`
    pub self_url: String,

    /// Bind address for HTTP
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// URLs of every node in the cluster (including this one)
    #[serde(default)]
    pub cluster_urls: Vec<String>,

    /// Working directory for persistent backends
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Storage backend for entities
    #[serde(default)]
    pub storage: StorageKind,

    /// Worker tasks serving replica calls
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Backlog of pending replica calls before new ones are rejected
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Per-replica deadline; a replica that misses it counts as missed
    #[serde(default = "default_replica_timeout")]
    pub replica_timeout_ms: u64,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Cluster inspector
    #[serde(default)]
    pub inspector: InspectorConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    Rocksdb,
    Sled,
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageKind::Memory => write!(f, "memory"),
            StorageKind::Rocksdb => write!(f, "rocksdb"),
            StorageKind::Sled => write!(f, "sled"),
        }
    }
}

/// Inspector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Node hosting the time-series; defaults to the first node in sorted order
    #[serde(default)]
    pub host_url: Option<String>,

    /// Polling period
    #[serde(default = "default_inspector_interval")]
    pub interval_ms: u64,

    /// Deadline for a single peer poll
    #[serde(default = "default_inspector_timeout")]
    pub request_timeout_ms: u64,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./shardkv-data")
}
fn default_workers() -> usize {
    8
}
fn default_queue_capacity() -> usize {
    100
}
fn default_replica_timeout() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_inspector_interval() -> u64 {
    1000
}
fn default_inspector_timeout() -> u64 {
    500
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host_url: None,
            interval_ms: default_inspector_interval(),
            request_timeout_ms: default_inspector_timeout(),
        }
    }
}

impl InspectorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl NodeConfig {
    /// Minimal config for a node; everything else takes defaults.
    pub fn new(self_url: impl Into<String>, cluster_urls: Vec<String>) -> Self {
        Self {
            self_url: self_url.into(),
            bind_addr: default_bind_addr(),
            cluster_urls,
            data_dir: default_data_dir(),
            storage: StorageKind::default(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            replica_timeout_ms: default_replica_timeout(),
            log_level: default_log_level(),
            inspector: InspectorConfig::default(),
        }
    }

    /// Load from a TOML file (explicit path, or `shardkv.toml` if present)
    /// with `SHARDKV__*` environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = config::Config::builder()
            .set_default("self_url", "http://localhost:8080")?
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cluster_urls"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Check invariants the node relies on at startup.
    pub fn validate(&self) -> Result<()> {
        if self.cluster_urls.is_empty() {
            return Err(Error::InvalidConfig("cluster_urls cannot be empty".into()));
        }
        if !self.cluster_urls.iter().any(|url| url == &self.self_url) {
            return Err(Error::InvalidConfig(format!(
                "self_url {} is not a member of cluster_urls",
                self.self_url
            )));
        }
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if let Some(host) = &self.inspector.host_url {
            if !self.cluster_urls.contains(host) {
                return Err(Error::InvalidConfig(format!(
                    "inspector host {} is not a member of cluster_urls",
                    host
                )));
            }
        }
        Ok(())
    }

    pub fn replica_timeout(&self) -> Duration {
        Duration::from_millis(self.replica_timeout_ms)
    }

    /// Node hosting the inspector time-series.
    pub fn inspector_host(&self) -> Option<String> {
        self.inspector
            .host_url
            .clone()
            .or_else(|| self.cluster_urls.iter().min().cloned())
    }
}
