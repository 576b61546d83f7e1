//! Key-value backends for the state store
//!
//! [`MemoryBackend`] keeps every column family in an ordered map and is the
//! default. [`RocksBackend`] persists to RocksDB and is available with the
//! `heavy-state` feature.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::schema::ALL_CFS;
use super::store::{StoreError, StoreResult};

/// One operation of an atomic write batch
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put {
        cf: &'static str,
        key: String,
        value: Vec<u8>,
    },
    Delete {
        cf: &'static str,
        key: String,
    },
}

/// Ordered key-value storage with column families
pub trait KvBackend: Send + Sync {
    /// Read a value
    fn get(&self, cf: &str, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Apply all operations atomically
    fn write(&self, batch: Vec<BatchOp>) -> StoreResult<()>;

    /// Insert a value only if the key is absent; returns whether it was inserted
    fn put_if_absent(&self, cf: &'static str, key: &str, value: Vec<u8>) -> StoreResult<bool>;

    /// Entries whose key starts with `prefix`, in key order
    fn scan_prefix(
        &self,
        cf: &str,
        prefix: &str,
        limit: Option<usize>,
    ) -> StoreResult<Vec<(String, Vec<u8>)>>;
}

type ColumnFamilies = HashMap<&'static str, BTreeMap<String, Vec<u8>>>;

/// In-memory backend
pub struct MemoryBackend {
    cfs: RwLock<ColumnFamilies>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let cfs = ALL_CFS.iter().map(|cf| (*cf, BTreeMap::new())).collect();
        Self {
            cfs: RwLock::new(cfs),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn missing_cf(cf: &str) -> StoreError {
    StoreError::ColumnFamilyNotFound(cf.to_string())
}

impl KvBackend for MemoryBackend {
    fn get(&self, cf: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let cfs = self.cfs.read().map_err(|_| StoreError::LockPoisoned)?;
        let map = cfs.get(cf).ok_or_else(|| missing_cf(cf))?;
        Ok(map.get(key).cloned())
    }

    fn write(&self, batch: Vec<BatchOp>) -> StoreResult<()> {
        let mut cfs = self.cfs.write().map_err(|_| StoreError::LockPoisoned)?;
        // Validate first so a bad batch leaves nothing half-applied
        for op in &batch {
            let cf = match op {
                BatchOp::Put { cf, .. } | BatchOp::Delete { cf, .. } => *cf,
            };
            if !cfs.contains_key(cf) {
                return Err(missing_cf(cf));
            }
        }
        for op in batch {
            match op {
                BatchOp::Put { cf, key, value } => {
                    if let Some(map) = cfs.get_mut(cf) {
                        map.insert(key, value);
                    }
                }
                BatchOp::Delete { cf, key } => {
                    if let Some(map) = cfs.get_mut(cf) {
                        map.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    fn put_if_absent(&self, cf: &'static str, key: &str, value: Vec<u8>) -> StoreResult<bool> {
        let mut cfs = self.cfs.write().map_err(|_| StoreError::LockPoisoned)?;
        let map = cfs.get_mut(cf).ok_or_else(|| missing_cf(cf))?;
        if map.contains_key(key) {
            return Ok(false);
        }
        map.insert(key.to_string(), value);
        Ok(true)
    }

    fn scan_prefix(
        &self,
        cf: &str,
        prefix: &str,
        limit: Option<usize>,
    ) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let cfs = self.cfs.read().map_err(|_| StoreError::LockPoisoned)?;
        let map = cfs.get(cf).ok_or_else(|| missing_cf(cf))?;
        let iter = map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()));
        Ok(match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        })
    }
}

#[cfg(feature = "heavy-state")]
pub use rocks::RocksBackend;

#[cfg(feature = "heavy-state")]
mod rocks {
    use std::path::Path;
    use std::sync::Mutex;

    use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};

    use super::{BatchOp, KvBackend, ALL_CFS};
    use crate::state::store::{StoreError, StoreResult};

    /// RocksDB-backed persistent backend
    pub struct RocksBackend {
        db: DB,
        /// Serializes check-then-insert for `put_if_absent`
        insert_guard: Mutex<()>,
    }

    impl RocksBackend {
        /// Open or create a database with all column families
        pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
            let mut opts = Options::default();
            opts.create_if_missing(true);
            opts.create_missing_column_families(true);

            let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
                .iter()
                .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
                .collect();

            let db = DB::open_cf_descriptors(&opts, path.as_ref(), cf_descriptors)?;

            Ok(Self {
                db,
                insert_guard: Mutex::new(()),
            })
        }

        fn cf(&self, name: &str) -> StoreResult<&rocksdb::ColumnFamily> {
            self.db
                .cf_handle(name)
                .ok_or_else(|| StoreError::ColumnFamilyNotFound(name.to_string()))
        }
    }

    impl KvBackend for RocksBackend {
        fn get(&self, cf: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
            let cf = self.cf(cf)?;
            Ok(self.db.get_cf(cf, key.as_bytes())?)
        }

        fn write(&self, batch: Vec<BatchOp>) -> StoreResult<()> {
            let mut wb = WriteBatch::default();
            for op in batch {
                match op {
                    BatchOp::Put { cf, key, value } => wb.put_cf(self.cf(cf)?, key, value),
                    BatchOp::Delete { cf, key } => wb.delete_cf(self.cf(cf)?, key),
                }
            }
            self.db.write(wb)?;
            Ok(())
        }

        fn put_if_absent(
            &self,
            cf: &'static str,
            key: &str,
            value: Vec<u8>,
        ) -> StoreResult<bool> {
            let _guard = self
                .insert_guard
                .lock()
                .map_err(|_| StoreError::LockPoisoned)?;
            let handle = self.cf(cf)?;
            if self.db.get_cf(handle, key.as_bytes())?.is_some() {
                return Ok(false);
            }
            self.db.put_cf(handle, key.as_bytes(), value)?;
            Ok(true)
        }

        fn scan_prefix(
            &self,
            cf: &str,
            prefix: &str,
            limit: Option<usize>,
        ) -> StoreResult<Vec<(String, Vec<u8>)>> {
            let handle = self.cf(cf)?;
            let iter = self.db.iterator_cf(
                handle,
                IteratorMode::From(prefix.as_bytes(), Direction::Forward),
            );

            let mut entries = Vec::new();
            for item in iter {
                let (key, value) = item?;
                let key = String::from_utf8(key.to_vec())
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
                if !key.starts_with(prefix) {
                    break; // Prefix no longer matches
                }
                entries.push((key, value.to_vec()));
                if limit.is_some_and(|n| entries.len() >= n) {
                    break;
                }
            }
            Ok(entries)
        }
    }
}
