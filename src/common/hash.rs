//! Key hashing for shardkv
//!
//! BLAKE3 maps an entity key onto a shard index; the shard index is then
//! resolved to replicas by the [`ShardRouter`](crate::cluster::ShardRouter).

/// Compute shard index for a key
pub fn shard_key(key: &str, num_shards: usize) -> usize {
    let hash = blake3::hash(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[0..8]);
    (u64::from_le_bytes(prefix) % num_shards as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_key_deterministic() {
        let key = "test-key";
        let shard1 = shard_key(key, 256);
        let shard2 = shard_key(key, 256);
        assert_eq!(shard1, shard2);
    }

    #[test]
    fn test_shard_key_in_range() {
        for i in 0..1000 {
            assert!(shard_key(&format!("key_{}", i), 3) < 3);
        }
    }

    #[test]
    fn test_shard_key_spreads() {
        let mut hits = [0usize; 3];
        for i in 0..300 {
            hits[shard_key(&format!("key_{}", i), 3)] += 1;
        }
        assert!(hits.iter().all(|&h| h > 0));
    }
}
