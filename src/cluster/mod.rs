//! Static cluster topology and shard routing

pub mod router;

pub use router::ShardRouter;
