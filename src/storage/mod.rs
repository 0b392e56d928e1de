//! Object-store abstraction.
//!
//! Every stage that touches documents or results goes through the
//! [`ObjectStore`] trait, so the workflow runs unchanged against a cloud
//! bucket, the local filesystem ([`LocalObjectStore`]) or memory
//! ([`InMemoryObjectStore`]).
//!
//! Keys are `/`-separated object keys (`landing/cert.pdf`), never filesystem
//! paths. Keys must not contain `..` segments or a leading `/`.

pub mod local;
pub mod memory;

pub use local::LocalObjectStore;
pub use memory::{InMemoryObjectStore, StoreOp};

use async_trait::async_trait;
use thiserror::Error;

/// Object-store operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("{op} failed for {bucket}/{key}: {detail}")]
    OperationFailed {
        op: StoreOp,
        bucket: String,
        key: String,
        detail: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Metadata returned by [`ObjectStore::head`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub size: u64,
}

/// Object-store abstraction trait.
///
/// `put` and `copy` overwrite an existing object at the destination key;
/// `delete` of a missing object is not an error.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read a whole object.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>>;

    /// Write a whole object, replacing any previous content.
    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>, content_type: &str)
        -> StorageResult<()>;

    /// Server-side copy within one bucket.
    async fn copy(&self, bucket: &str, from_key: &str, to_key: &str) -> StorageResult<()>;

    /// Remove an object.
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Object metadata, or `None` when the object does not exist.
    async fn head(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectMeta>>;

    /// Keys under `prefix`, sorted.
    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Reject keys that are empty or absolute, or that have empty, `.` or `..`
/// segments. Two distinct keys must never name the same object.
pub(crate) fn check_key(key: &str) -> StorageResult<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|s| s.is_empty() || s == "." || s == "..")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
