//! Shard routing properties over varied cluster sizes

use std::collections::HashSet;

use shardkv::{Error, ShardRouter};

fn cluster(size: usize) -> Vec<String> {
    // Unsorted on purpose
    (0..size)
        .rev()
        .map(|i| format!("http://node-{:02}:8080", i))
        .collect()
}

#[test]
fn test_windows_cover_cluster_in_ring_order() {
    for size in 1..=7 {
        let router = ShardRouter::build(cluster(size)).unwrap();
        let nodes = router.addresses();

        for shard in 0..size {
            let window = router.replica_window(shard).unwrap();
            assert_eq!(window.len(), size);
            assert_eq!(window[0], router.address_of_shard(shard).unwrap());

            let distinct: HashSet<_> = window.iter().collect();
            assert_eq!(distinct.len(), size);

            for (offset, node) in window.iter().enumerate() {
                assert_eq!(node, &nodes[(shard + offset) % size]);
            }
        }
    }
}

#[test]
fn test_replicas_are_window_prefixes() {
    let router = ShardRouter::build(cluster(5)).unwrap();
    for shard in 0..5 {
        let window = router.replica_window(shard).unwrap();
        for n in 0..=5 {
            assert_eq!(router.replicas(shard, n).unwrap(), &window[..n]);
        }
        assert!(matches!(
            router.replicas(shard, 6),
            Err(Error::InsufficientReplicas { needed: 6, available: 5 })
        ));
    }
}

#[test]
fn test_address_and_shard_are_inverse() {
    let router = ShardRouter::build(cluster(6)).unwrap();
    for shard in 0..6 {
        let address = router.address_of_shard(shard).unwrap();
        assert_eq!(router.shard_of_address(address), Some(shard));
    }
    assert!(router.address_of_shard(6).is_err());
    assert!(router.replica_window(6).is_err());
    assert_eq!(router.shard_of_address("http://elsewhere"), None);
}

#[test]
fn test_duplicates_collapse() {
    let mut urls = cluster(3);
    urls.extend(cluster(3));
    let router = ShardRouter::build(urls).unwrap();
    assert_eq!(router.cluster_size(), 3);
}

#[test]
fn test_keys_spread_over_shards() {
    let router = ShardRouter::build(cluster(4)).unwrap();
    let mut seen = HashSet::new();
    for i in 0..1000 {
        let key = format!("key-{}", i);
        let shard = router.shard_for_key(&key);
        assert!(shard < 4);
        assert_eq!(shard, router.shard_for_key(&key));
        seen.insert(shard);
    }
    assert_eq!(seen.len(), 4);
}

#[test]
fn test_empty_cluster_rejected() {
    assert!(matches!(
        ShardRouter::build(Vec::<String>::new()),
        Err(Error::EmptyCluster)
    ));
}
