//! Request coordination
//!
//! A node coordinating a client request:
//! - routes the key to its shard and replica window
//! - fans the operation out to `from` replicas through a bounded pool
//! - collects replica events into a lock-free quorum state
//! - answers once `ack` replicas agreed or the quorum became unreachable

pub mod dispatch;
pub mod http;
pub mod pool;
pub mod quorum;
pub mod replica;
pub mod server;

pub use quorum::{AckState, Method, QuorumOutcome, VersionedValue};
pub use server::Node;
