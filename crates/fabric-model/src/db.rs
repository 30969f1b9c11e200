//! In-memory transactional key/value store.
//!
//! Records live in named buckets. Read transactions share the store; a write
//! transaction is exclusive, stages its changes, and publishes them only if
//! its closure returns `Ok`.

use std::collections::BTreeMap;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::StoreError;

pub const BUCKET_SERVICES: &str = "services";
pub const BUCKET_TERMINATORS: &str = "terminators";

type Bucket = BTreeMap<String, Vec<u8>>;
type Buckets = BTreeMap<String, Bucket>;

/// Read access shared by both transaction kinds.
pub trait ReadTx {
    fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>>;

    /// Keys of `bucket` in ascending order.
    fn keys(&self, bucket: &str) -> Vec<String>;

    fn contains(&self, bucket: &str, key: &str) -> bool {
        self.get(bucket, key).is_some()
    }
}

pub struct ViewTx<'a> {
    data: RwLockReadGuard<'a, Buckets>,
}

impl ReadTx for ViewTx<'_> {
    fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.data.get(bucket)?.get(key).cloned()
    }

    fn keys(&self, bucket: &str) -> Vec<String> {
        self.data
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }
}

pub struct UpdateTx<'a> {
    data: RwLockWriteGuard<'a, Buckets>,
    staged: BTreeMap<(String, String), Option<Vec<u8>>>,
}

impl UpdateTx<'_> {
    /// Writes `value`, replacing any existing record.
    pub fn put(&mut self, bucket: &str, key: &str, value: Vec<u8>) {
        self.staged
            .insert((bucket.to_string(), key.to_string()), Some(value));
    }

    /// Writes `value`, failing if the key already exists.
    pub fn insert(&mut self, bucket: &str, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        if self.contains(bucket, key) {
            return Err(StoreError::AlreadyExists {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        self.put(bucket, key, value);
        Ok(())
    }

    /// Deletes a record. Returns whether it existed.
    pub fn delete(&mut self, bucket: &str, key: &str) -> bool {
        let existed = self.contains(bucket, key);
        if existed {
            self.staged
                .insert((bucket.to_string(), key.to_string()), None);
        }
        existed
    }

    fn commit(mut self) {
        let staged = std::mem::take(&mut self.staged);
        for ((bucket, key), value) in staged {
            let records = self.data.entry(bucket).or_default();
            match value {
                Some(value) => {
                    records.insert(key, value);
                }
                None => {
                    records.remove(&key);
                }
            }
        }
    }
}

impl ReadTx for UpdateTx<'_> {
    fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        match self.staged.get(&(bucket.to_string(), key.to_string())) {
            Some(staged) => staged.clone(),
            None => self.data.get(bucket)?.get(key).cloned(),
        }
    }

    fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: BTreeMap<String, bool> = self
            .data
            .get(bucket)
            .map(|b| b.keys().map(|k| (k.clone(), true)).collect())
            .unwrap_or_default();
        for ((b, key), value) in &self.staged {
            if b == bucket {
                keys.insert(key.clone(), value.is_some());
            }
        }
        keys.into_iter()
            .filter_map(|(key, present)| present.then_some(key))
            .collect()
    }
}

#[derive(Default)]
pub struct Db {
    data: RwLock<Buckets>,
}

impl Db {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view<T, E>(&self, f: impl FnOnce(&ViewTx<'_>) -> Result<T, E>) -> Result<T, E> {
        let tx = ViewTx {
            data: self.data.read(),
        };
        f(&tx)
    }

    /// Runs `f` in an exclusive transaction, committing only on `Ok`.
    pub fn update<T, E>(&self, f: impl FnOnce(&mut UpdateTx<'_>) -> Result<T, E>) -> Result<T, E> {
        let mut tx = UpdateTx {
            data: self.data.write(),
            staged: BTreeMap::new(),
        };
        let result = f(&mut tx)?;
        tx.commit();
        Ok(result)
    }

    /// Number of records in `bucket`.
    pub fn count(&self, bucket: &str) -> usize {
        self.data.read().get(bucket).map_or(0, BTreeMap::len)
    }
}
