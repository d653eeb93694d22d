//! Ordered key-value storage for shardkv
//!
//! Supports in-memory, RocksDB, and Sled backends. Entities and inspector
//! time-series both live behind the same [`KvStore`] trait.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::path::Path;
use std::sync::{Arc, RwLock};

use rocksdb::{Direction, IteratorMode, Options, DB};

use crate::common::{Error, Result, StorageKind};

/// Entries fetched per lock acquisition when scanning a [`MemStore`]
const MEM_RANGE_CHUNK: usize = 128;

/// Lazy forward scan over `(key, value)` pairs
pub type RangeIter<'a> = Box<dyn Iterator<Item = Result<(String, Vec<u8>)>> + 'a>;

/// Trait for key-value storage backends
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;

    /// Keys in `[from, to)` in ascending order; `to = None` scans to the end.
    fn range<'a>(&'a self, from: &str, to: Option<&str>) -> Result<RangeIter<'a>>;

    /// Number of stored keys (may be an estimate on disk backends)
    fn approximate_len(&self) -> Result<u64>;
}

/// In-memory ordered store (default)
#[derive(Debug, Default)]
pub struct MemStore {
    map: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Internal("memory store lock poisoned".into())
}

impl KvStore for MemStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().map_err(poisoned)?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.map
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.map.write().map_err(poisoned)?.remove(key);
        Ok(())
    }

    fn range<'a>(&'a self, from: &str, to: Option<&str>) -> Result<RangeIter<'a>> {
        let exhausted = to.is_some_and(|to| from > to);
        Ok(Box::new(MemRange {
            map: &self.map,
            cursor: Bound::Included(from.to_string()),
            to: to.map(str::to_owned),
            buffer: VecDeque::new(),
            done: exhausted,
        }))
    }

    fn approximate_len(&self) -> Result<u64> {
        Ok(self.map.read().map_err(poisoned)?.len() as u64)
    }
}

/// Chunked scan: the read lock is only held while a chunk is copied out.
struct MemRange<'a> {
    map: &'a RwLock<BTreeMap<String, Vec<u8>>>,
    cursor: Bound<String>,
    to: Option<String>,
    buffer: VecDeque<(String, Vec<u8>)>,
    done: bool,
}

impl MemRange<'_> {
    fn refill(&mut self) -> Result<()> {
        let map = self.map.read().map_err(poisoned)?;
        let upper = match &self.to {
            Some(to) => Bound::Excluded(to.clone()),
            None => Bound::Unbounded,
        };
        self.buffer.extend(
            map.range((self.cursor.clone(), upper))
                .take(MEM_RANGE_CHUNK)
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        if self.buffer.len() < MEM_RANGE_CHUNK {
            self.done = true;
        }
        if let Some((last, _)) = self.buffer.back() {
            self.cursor = Bound::Excluded(last.clone());
        }
        Ok(())
    }
}

impl Iterator for MemRange<'_> {
    type Item = Result<(String, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            if let Err(e) = self.refill() {
                self.done = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

fn decode_key(raw: &[u8]) -> Result<String> {
    String::from_utf8(raw.to_vec()).map_err(|_| Error::Corrupted("non UTF-8 key".into()))
}

/// RocksDB store
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }
}

impl KvStore for RocksStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        Ok(self.db.put(key, value)?)
    }

    fn delete(&self, key: &str) -> Result<()> {
        Ok(self.db.delete(key)?)
    }

    fn range<'a>(&'a self, from: &str, to: Option<&str>) -> Result<RangeIter<'a>> {
        let to = to.map(str::to_owned);
        let iter = self
            .db
            .iterator(IteratorMode::From(from.as_bytes(), Direction::Forward))
            .map(|item| -> Result<(String, Vec<u8>)> {
                let (key, value) = item?;
                Ok((decode_key(&key)?, value.to_vec()))
            })
            .take_while(move |item: &Result<(String, Vec<u8>)>| match (item, &to) {
                (Ok((key, _)), Some(to)) => key < to,
                _ => true,
            });
        Ok(Box::new(iter))
    }

    fn approximate_len(&self) -> Result<u64> {
        Ok(self
            .db
            .property_int_value("rocksdb.estimate-num-keys")?
            .unwrap_or(0))
    }
}

/// Sled store
#[cfg(feature = "sled-backend")]
pub struct SledStore {
    db: sled::Db,
}

#[cfg(feature = "sled-backend")]
impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }
}

#[cfg(feature = "sled-backend")]
impl KvStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|ivec| ivec.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.db.remove(key)?;
        Ok(())
    }

    fn range<'a>(&'a self, from: &str, to: Option<&str>) -> Result<RangeIter<'a>> {
        let lower = Bound::Included(from.as_bytes().to_vec());
        let upper = match to {
            Some(to) => Bound::Excluded(to.as_bytes().to_vec()),
            None => Bound::Unbounded,
        };
        let iter = self
            .db
            .range((lower, upper))
            .map(|item| -> Result<(String, Vec<u8>)> {
                let (key, value) = item?;
                Ok((decode_key(&key)?, value.to_vec()))
            });
        Ok(Box::new(iter))
    }

    fn approximate_len(&self) -> Result<u64> {
        Ok(self.db.len() as u64)
    }
}

/// Shared handle over the configured backend
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn KvStore>,
}

impl Storage {
    pub fn new_memory() -> Self {
        Self {
            backend: Arc::new(MemStore::new()),
        }
    }

    pub fn new_rocks(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            backend: Arc::new(RocksStore::open(path)?),
        })
    }

    #[cfg(feature = "sled-backend")]
    pub fn new_sled(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            backend: Arc::new(SledStore::open(path)?),
        })
    }

    /// Open the backend selected in configuration. `path` is ignored for memory.
    pub fn open(kind: StorageKind, path: impl AsRef<Path>) -> Result<Self> {
        match kind {
            StorageKind::Memory => Ok(Self::new_memory()),
            StorageKind::Rocksdb => {
                std::fs::create_dir_all(path.as_ref())?;
                Self::new_rocks(path)
            }
            #[cfg(feature = "sled-backend")]
            StorageKind::Sled => Self::new_sled(path),
            #[cfg(not(feature = "sled-backend"))]
            StorageKind::Sled => Err(Error::InvalidConfig(
                "sled storage requires the sled-backend feature".into(),
            )),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.backend.get(key)
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.backend.put(key, value)
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.backend.delete(key)
    }

    pub fn range(&self, from: &str, to: Option<&str>) -> Result<RangeIter<'_>> {
        self.backend.range(from, to)
    }

    pub fn approximate_len(&self) -> Result<u64> {
        self.backend.approximate_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(storage: &Storage, from: &str, to: Option<&str>) -> Vec<String> {
        storage
            .range(from, to)
            .unwrap()
            .map(|item| item.unwrap().0)
            .collect()
    }

    #[test]
    fn test_memory_point_operations() {
        let storage = Storage::new_memory();
        assert!(storage.get("k").unwrap().is_none());

        storage.put("k", b"v1").unwrap();
        assert_eq!(storage.get("k").unwrap().unwrap(), b"v1");

        storage.put("k", b"v2").unwrap();
        assert_eq!(storage.get("k").unwrap().unwrap(), b"v2");

        storage.delete("k").unwrap();
        assert!(storage.get("k").unwrap().is_none());
    }

    #[test]
    fn test_memory_range_bounds() {
        let storage = Storage::new_memory();
        for key in ["a", "b", "c", "d"] {
            storage.put(key, key.as_bytes()).unwrap();
        }

        assert_eq!(keys(&storage, "b", Some("d")), vec!["b", "c"]);
        assert_eq!(keys(&storage, "b", None), vec!["b", "c", "d"]);
        assert!(keys(&storage, "d", Some("b")).is_empty());
        assert!(keys(&storage, "c", Some("c")).is_empty());
    }

    #[test]
    fn test_memory_range_spans_chunks() {
        let storage = Storage::new_memory();
        let n = MEM_RANGE_CHUNK * 2 + 7;
        for i in 0..n {
            storage.put(&format!("key_{:05}", i), b"v").unwrap();
        }

        let scanned = keys(&storage, "", None);
        assert_eq!(scanned.len(), n);
        assert!(scanned.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(storage.approximate_len().unwrap(), n as u64);
    }

    #[test]
    fn test_range_is_restartable() {
        let storage = Storage::new_memory();
        storage.put("x", b"1").unwrap();
        storage.put("y", b"2").unwrap();

        assert_eq!(keys(&storage, "x", None), keys(&storage, "x", None));
    }

    #[test]
    fn test_rocks_backend() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(StorageKind::Rocksdb, dir.path().join("db")).unwrap();

        for key in ["a", "b", "c"] {
            storage.put(key, key.as_bytes()).unwrap();
        }
        assert_eq!(storage.get("b").unwrap().unwrap(), b"b");
        assert_eq!(keys(&storage, "a", Some("c")), vec!["a", "b"]);

        storage.delete("a").unwrap();
        assert!(storage.get("a").unwrap().is_none());
        assert_eq!(keys(&storage, "", None), vec!["b", "c"]);
    }

    #[cfg(not(feature = "sled-backend"))]
    #[test]
    fn test_sled_requires_feature() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Storage::open(StorageKind::Sled, dir.path()).is_err());
    }
}
