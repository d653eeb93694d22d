//! Shard routing over a static, sorted cluster
//!
//! Every node address owns the shard equal to its position in the sorted
//! topology. Replicas of a shard are the following nodes in ring order, which
//! is served as a slice of the topology concatenated with itself.

use crate::common::{shard_key, Error, Result};

/// ShardRouter maps shard indices to ordered replica windows.
#[derive(Debug, Clone)]
pub struct ShardRouter {
    /// Sorted, de-duplicated node addresses
    nodes: Vec<String>,
    /// `nodes` followed by `nodes` again, so any window is one contiguous slice
    rotation: Vec<String>,
}

impl ShardRouter {
    pub fn build<I, S>(addresses: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut nodes: Vec<String> = addresses.into_iter().map(Into::into).collect();
        if nodes.is_empty() {
            return Err(Error::EmptyCluster);
        }
        nodes.sort();
        nodes.dedup();

        let rotation = nodes.iter().chain(nodes.iter()).cloned().collect();

        Ok(Self { nodes, rotation })
    }

    pub fn cluster_size(&self) -> usize {
        self.nodes.len()
    }

    /// All node addresses in shard order
    pub fn addresses(&self) -> &[String] {
        &self.nodes
    }

    /// Primary owner of `shard`
    pub fn address_of_shard(&self, shard: usize) -> Result<&str> {
        self.nodes
            .get(shard)
            .map(String::as_str)
            .ok_or(Error::ShardNotFound(shard))
    }

    /// Shard owned by `address`. Linear scan; clusters are small.
    pub fn shard_of_address(&self, address: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node == address)
    }

    /// The whole cluster, rotated so that the owner of `shard` comes first
    pub fn replica_window(&self, shard: usize) -> Result<&[String]> {
        let size = self.cluster_size();
        if shard >= size {
            return Err(Error::ShardNotFound(shard));
        }
        Ok(&self.rotation[shard..shard + size])
    }

    /// First `n` nodes of the replica window of `shard`
    pub fn replicas(&self, shard: usize, n: usize) -> Result<&[String]> {
        let window = self.replica_window(shard)?;
        if n > window.len() {
            return Err(Error::InsufficientReplicas {
                needed: n,
                available: window.len(),
            });
        }
        Ok(&window[..n])
    }

    /// Shard responsible for an entity key
    pub fn shard_for_key(&self, key: &str) -> usize {
        shard_key(key, self.cluster_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> ShardRouter {
        ShardRouter::build(["c", "a", "b"]).unwrap()
    }

    #[test]
    fn test_topology_is_sorted() {
        let router = router();
        assert_eq!(router.addresses(), ["a", "b", "c"]);
        assert_eq!(router.cluster_size(), 3);
    }

    #[test]
    fn test_rotation_repeats_topology() {
        let router = router();
        let size = router.cluster_size();
        for i in 0..size {
            assert_eq!(router.rotation[i], router.rotation[i + size]);
        }
    }

    #[test]
    fn test_replica_windows() {
        let router = router();
        assert_eq!(router.replica_window(0).unwrap(), ["a", "b", "c"]);
        assert_eq!(router.replica_window(1).unwrap(), ["b", "c", "a"]);
        assert_eq!(router.replica_window(2).unwrap(), ["c", "a", "b"]);
    }

    #[test]
    fn test_replica_window_out_of_range() {
        assert!(matches!(
            router().replica_window(3),
            Err(Error::ShardNotFound(3))
        ));
    }

    #[test]
    fn test_replicas_prefix() {
        let router = router();
        assert_eq!(router.replicas(2, 2).unwrap(), ["c", "a"]);
        assert_eq!(router.replicas(1, 1).unwrap(), ["b"]);
        assert!(router.replicas(0, 4).is_err());
    }

    #[test]
    fn test_address_shard_inverse() {
        let router = router();
        for shard in 0..router.cluster_size() {
            let address = router.address_of_shard(shard).unwrap();
            assert_eq!(router.shard_of_address(address), Some(shard));
        }
        assert_eq!(router.shard_of_address("z"), None);
        assert!(router.address_of_shard(3).is_err());
    }

    #[test]
    fn test_order_independent_of_input() {
        let a = ShardRouter::build(["b", "a", "c"]).unwrap();
        let b = ShardRouter::build(vec!["c".to_string(), "b".into(), "a".into()]).unwrap();
        assert_eq!(a.addresses(), b.addresses());
    }

    #[test]
    fn test_duplicates_collapse() {
        let router = ShardRouter::build(["a", "b", "a"]).unwrap();
        assert_eq!(router.cluster_size(), 2);
    }

    #[test]
    fn test_empty_cluster() {
        let empty: Vec<String> = vec![];
        assert!(matches!(
            ShardRouter::build(empty),
            Err(Error::EmptyCluster)
        ));
    }

    #[test]
    fn test_shard_for_key_in_range() {
        let router = router();
        for i in 0..100 {
            assert!(router.shard_for_key(&format!("key_{}", i)) < 3);
        }
    }
}
