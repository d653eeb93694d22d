//! Common utilities and types shared across shardkv

pub mod config;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod storage;
pub mod utils;

pub use config::{InspectorConfig, NodeConfig, StorageKind};
pub use error::{Error, Result};
pub use hash::shard_key;
pub use metrics::METRICS;
pub use storage::{KvStore, Storage};
pub use utils::{parse_duration, timestamp_now_millis};
