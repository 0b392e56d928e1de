//! Filesystem-backed object store.
//!
//! Layout: `{root}/{bucket}/{key}`. Writes go to a temp file in the target
//! directory and are renamed into place, so a reader never observes a
//! half-written object and a crashed write leaves nothing behind.

use super::{check_key, ObjectMeta, ObjectStore, StorageError, StorageResult, StoreOp};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Local filesystem [`ObjectStore`].
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::Config(format!(
                "Failed to create store root {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_path(&self, bucket: &str) -> StorageResult<PathBuf> {
        if bucket.is_empty() || bucket.contains('/') || bucket == "." || bucket == ".." {
            return Err(StorageError::InvalidKey(format!("bucket '{bucket}'")));
        }
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        check_key(key)?;
        let mut path = self.bucket_path(bucket)?;
        for segment in key.split('/') {
            path.push(segment);
        }
        Ok(path)
    }

    /// Write `data` to `path` via temp file + rename.
    fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| std::io::Error::other("object path has no parent"))?;
        std::fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn failed(op: StoreOp, bucket: &str, key: &str, e: impl ToString) -> StorageError {
        StorageError::OperationFailed {
            op,
            bucket: bucket.to_string(),
            key: key.to_string(),
            detail: e.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(Self::failed(StoreOp::Get, bucket, key, e)),
        }
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> StorageResult<()> {
        let path = self.object_path(bucket, key)?;
        let size = data.len();
        let target = path.clone();
        tokio::task::spawn_blocking(move || Self::write_atomic(&target, &data))
            .await
            .map_err(|e| Self::failed(StoreOp::Put, bucket, key, e))?
            .map_err(|e| Self::failed(StoreOp::Put, bucket, key, e))?;
        debug!(path = %path.display(), size_bytes = size, "Local store put");
        Ok(())
    }

    async fn copy(&self, bucket: &str, from_key: &str, to_key: &str) -> StorageResult<()> {
        let data = self.get(bucket, from_key).await?;
        self.put(bucket, to_key, data, "application/octet-stream")
            .await
            .map_err(|e| Self::failed(StoreOp::Copy, bucket, from_key, e))
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::failed(StoreOp::Delete, bucket, key, e)),
        }
    }

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectMeta>> {
        let path = self.object_path(bucket, key)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(ObjectMeta { size: meta.len() })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::failed(StoreOp::Head, bucket, key, e)),
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let base = self.bucket_path(bucket)?;
        let mut keys = Vec::new();
        let mut pending = vec![base.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Self::failed(StoreOp::List, bucket, prefix, e)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&base) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                // Skip in-flight temp files from concurrent writers.
                if rel
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with(".tmp"))
                {
                    continue;
                }
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
