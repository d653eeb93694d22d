//! # shardkv
//!
//! A sharded, replicated key-value store node:
//! - static cluster, every node owns one shard and replicates its neighbours
//! - per-request `ack`/`from` quorums with last-write-wins reads
//! - lock-free acknowledgment tracking, one terminal response per request
//! - bounded worker pool for replica calls
//! - a cluster inspector polling node statistics into a time-series
//!
//! ## Architecture
//!
//! ```text
//!            client: GET/PUT/DELETE /v0/entity?id=k&ack=2&from=3
//!                                  │
//!                        ┌─────────▼─────────┐
//!                        │  coordinating node │
//!                        │  route → fan out   │
//!                        └──┬──────┬──────┬───┘
//!                 local     │      │ HTTP │ /v0/replica/entity
//!                  ┌────────▼┐  ┌──▼─────┐ ┌▼────────┐
//!                  │ shard i │  │ i + 1  │ │ i + 2   │
//!                  └─────────┘  └────────┘ └─────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a node
//! ```bash
//! shardkv-node serve \
//!   --self-url http://localhost:8080 \
//!   --bind 0.0.0.0:8080 \
//!   --cluster http://localhost:8080,http://localhost:8081,http://localhost:8082 \
//!   --data-dir ./node-0
//! ```
//!
//! ### Use the CLI
//! ```bash
//! shardkv put my-key my-value --ack 2 --from 3
//! shardkv get my-key
//! shardkv delete my-key
//! shardkv inspect --shard 0 --from 0
//! ```

#![allow(clippy::result_large_err)]

pub mod cluster;
pub mod common;
pub mod coordinator;
pub mod inspector;

// Re-export commonly used types
pub use cluster::ShardRouter;
pub use common::{Error, NodeConfig, Result};
pub use coordinator::{AckState, Method, Node, QuorumOutcome, VersionedValue};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
