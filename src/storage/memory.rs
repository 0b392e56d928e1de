//! In-memory object store with fault injection.
//!
//! Used by the test suite and handy for demos: every object lives in a
//! `BTreeMap`, and individual operations on individual keys can be told to
//! fail, which is how the archiver's copy/verify/delete guarantees are
//! exercised without a real bucket.

use super::{check_key, ObjectMeta, ObjectStore, StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Mutex;

/// Object-store operation, used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Put,
    Copy,
    Delete,
    Head,
    List,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoreOp::Get => "get",
            StoreOp::Put => "put",
            StoreOp::Copy => "copy",
            StoreOp::Delete => "delete",
            StoreOp::Head => "head",
            StoreOp::List => "list",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Fail the next `n` matching calls.
    Times(usize),
    Always,
    /// Apply the operation, then report failure (a lost response).
    AfterApply,
}

type ObjectKey = (String, String);

/// Memory-backed [`ObjectStore`].
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<ObjectKey, Vec<u8>>>,
    faults: Mutex<HashMap<(StoreOp, String), Fault>>,
    calls: Mutex<Vec<(StoreOp, String)>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without going through the trait (no faults, no call log).
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Vec<u8>>) {
        lock(&self.objects).insert((bucket.to_string(), key.to_string()), data.into());
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        lock(&self.objects).contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        lock(&self.objects)
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// All keys in `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        lock(&self.objects)
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Make every `op` on `key` fail until cleared.
    pub fn fail_always(&self, op: StoreOp, key: &str) {
        lock(&self.faults).insert((op, key.to_string()), Fault::Always);
    }

    /// Make the next `times` calls of `op` on `key` fail.
    pub fn fail_times(&self, op: StoreOp, key: &str, times: usize) {
        lock(&self.faults).insert((op, key.to_string()), Fault::Times(times));
    }

    /// Make every `op` on `key` take effect and then return an error.
    pub fn fail_after_apply(&self, op: StoreOp, key: &str) {
        lock(&self.faults).insert((op, key.to_string()), Fault::AfterApply);
    }

    pub fn clear_faults(&self) {
        lock(&self.faults).clear();
    }

    /// Number of trait calls of `op` seen so far (any key).
    pub fn call_count(&self, op: StoreOp) -> usize {
        lock(&self.calls).iter().filter(|(o, _)| *o == op).count()
    }

    fn enter(&self, op: StoreOp, bucket: &str, key: &str) -> StorageResult<()> {
        lock(&self.calls).push((op, key.to_string()));
        let mut faults = lock(&self.faults);
        let fault_key = (op, key.to_string());
        let fire = match faults.get_mut(&fault_key) {
            Some(Fault::Always) => true,
            Some(Fault::Times(n)) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        };
        if fire {
            return Err(injected(op, bucket, key));
        }
        Ok(())
    }

    fn leave(&self, op: StoreOp, bucket: &str, key: &str) -> StorageResult<()> {
        match lock(&self.faults).get(&(op, key.to_string())) {
            Some(Fault::AfterApply) => Err(injected(op, bucket, key)),
            _ => Ok(()),
        }
    }
}

fn injected(op: StoreOp, bucket: &str, key: &str) -> StorageError {
    StorageError::OperationFailed {
        op,
        bucket: bucket.to_string(),
        key: key.to_string(),
        detail: "injected fault".to_string(),
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A panic while holding the lock leaves plain data behind; keep going.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn not_found(bucket: &str, key: &str) -> StorageError {
    StorageError::NotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        check_key(key)?;
        self.enter(StoreOp::Get, bucket, key)?;
        self.object(bucket, key)
            .ok_or_else(|| not_found(bucket, key))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> StorageResult<()> {
        check_key(key)?;
        self.enter(StoreOp::Put, bucket, key)?;
        self.insert(bucket, key, data);
        self.leave(StoreOp::Put, bucket, key)
    }

    async fn copy(&self, bucket: &str, from_key: &str, to_key: &str) -> StorageResult<()> {
        check_key(from_key)?;
        check_key(to_key)?;
        self.enter(StoreOp::Copy, bucket, from_key)?;
        let data = self
            .object(bucket, from_key)
            .ok_or_else(|| not_found(bucket, from_key))?;
        self.insert(bucket, to_key, data);
        self.leave(StoreOp::Copy, bucket, from_key)
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        check_key(key)?;
        self.enter(StoreOp::Delete, bucket, key)?;
        lock(&self.objects).remove(&(bucket.to_string(), key.to_string()));
        self.leave(StoreOp::Delete, bucket, key)
    }

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectMeta>> {
        check_key(key)?;
        self.enter(StoreOp::Head, bucket, key)?;
        Ok(self.object(bucket, key).map(|d| ObjectMeta {
            size: d.len() as u64,
        }))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        self.enter(StoreOp::List, bucket, prefix)?;
        Ok(self
            .keys(bucket)
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}
