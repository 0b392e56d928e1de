//! Move processed documents from the landing prefix to the archive prefix.
//!
//! The move is copy → verify → delete. At every step the document exists in
//! at least one place, and the archiver cleans up so that when it returns the
//! document lives in exactly one place:
//!
//! | step fails                   | cleanup                | document ends up in |
//! |------------------------------|------------------------|---------------------|
//! | copy                         | none needed            | landing             |
//! | verify                       | delete the staged copy | landing             |
//! | delete, source still present | delete the staged copy | landing             |
//! | delete, source gone          | none                   | archive             |
//! | delete, source unknown       | none                   | archive, maybe both |
//!
//! A failed delete may still have been applied, so the source is checked
//! before the staged copy is removed. Only if the cleanup itself fails are
//! two copies left behind, and the error says so. Deleting the source
//! before the copy is confirmed is never done.
//!
//! Lifecycle transitions under the archive prefix (cold storage classes) are
//! bucket configuration and happen outside this crate.

use crate::error::IngestError;
use crate::model::DocumentReference;
use crate::storage::{ObjectMeta, ObjectStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Relocates documents into the archive prefix.
#[derive(Clone)]
pub struct Archiver {
    store: Arc<dyn ObjectStore>,
    landing_prefix: String,
    archive_prefix: String,
}

impl std::fmt::Debug for Archiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archiver")
            .field("landing_prefix", &self.landing_prefix)
            .field("archive_prefix", &self.archive_prefix)
            .finish()
    }
}

impl Archiver {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        landing_prefix: impl Into<String>,
        archive_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            landing_prefix: landing_prefix.into(),
            archive_prefix: archive_prefix.into(),
        }
    }

    /// Archive key for `document`.
    ///
    /// The path below the landing prefix is kept (`landing/a/b.pdf` →
    /// `archive/a/b.pdf`); keys outside the landing prefix keep only their
    /// file name.
    pub fn archive_key(&self, document: &DocumentReference) -> String {
        let relative = document
            .key
            .strip_prefix(&self.landing_prefix)
            .filter(|rest| !rest.is_empty())
            .unwrap_or_else(|| document.file_name());
        format!("{}{}", self.archive_prefix, relative)
    }

    /// Move `document` into the archive and return its new reference.
    ///
    /// Re-archiving a document that is already in the archive (source gone,
    /// archive copy present) returns the archive reference unchanged.
    pub async fn archive(
        &self,
        document: &DocumentReference,
    ) -> Result<DocumentReference, IngestError> {
        document.ensure_well_formed()?;
        let bucket = &document.bucket;
        let target = document.with_key(self.archive_key(document));
        if target.key == document.key {
            return Ok(target);
        }

        let source_meta = self.store.head(bucket, &document.key).await?;
        let Some(source_meta) = source_meta else {
            if self.store.head(bucket, &target.key).await?.is_some() {
                info!(key = %document.key, archive = %target.key, "Document already archived");
                return Ok(target);
            }
            return Err(self.failure(document, "source object does not exist", false, false));
        };

        if let Err(e) = self.store.copy(bucket, &document.key, &target.key).await {
            // A failed copy may still have produced an object; make sure the
            // only live copy is the source.
            let archive_present = self.remove_staged(&target).await;
            return Err(self.failure(
                document,
                &format!("copy to '{}' failed: {e}", target.key),
                true,
                archive_present,
            ));
        }
        let staged = StagedCopy {
            archiver: self,
            source: document,
            target: &target,
        };

        match self.store.head(bucket, &target.key).await {
            Ok(Some(meta)) if meta == source_meta => {}
            Ok(found) => {
                let detail = match found {
                    Some(ObjectMeta { size }) => format!(
                        "archive copy has {size} bytes, source has {}",
                        source_meta.size
                    ),
                    None => "archive copy missing after copy".to_string(),
                };
                return Err(staged.rollback(&detail).await);
            }
            Err(e) => {
                return Err(staged.rollback(&format!("could not verify archive copy: {e}")).await);
            }
        }

        if let Err(e) = self.store.delete(bucket, &document.key).await {
            let detail = format!("could not delete source: {e}");
            return match self.store.head(bucket, &document.key).await {
                Ok(Some(_)) => Err(staged.rollback(&detail).await),
                Ok(None) => {
                    warn!(key = %document.key, error = %e, "Source delete reported an error but was applied");
                    staged.commit();
                    Ok(target)
                }
                Err(head_err) => Err(staged.keep(&format!(
                    "{detail}; source state unknown: {head_err}"
                ))),
            };
        }

        staged.commit();
        Ok(target)
    }

    /// Best-effort delete of a staged archive copy. Returns whether a copy
    /// is still present afterwards.
    async fn remove_staged(&self, target: &DocumentReference) -> bool {
        match self.store.delete(&target.bucket, &target.key).await {
            Ok(()) => false,
            Err(e) => {
                warn!(key = %target.key, error = %e, "Failed to remove staged archive copy");
                !matches!(self.store.head(&target.bucket, &target.key).await, Ok(None))
            }
        }
    }

    fn failure(
        &self,
        document: &DocumentReference,
        detail: &str,
        source_present: bool,
        archive_present: bool,
    ) -> IngestError {
        IngestError::ArchivalFailed {
            key: document.key.clone(),
            detail: detail.to_string(),
            source_present,
            archive_present,
        }
    }
}

/// A copy in the archive prefix whose source has not been deleted yet.
///
/// Resolved by [`StagedCopy::commit`] (source deleted, copy kept),
/// [`StagedCopy::rollback`] (copy removed, source kept) or
/// [`StagedCopy::keep`] (copy kept, source state unknown).
#[must_use = "a staged archive copy must be committed, rolled back or kept"]
struct StagedCopy<'a> {
    archiver: &'a Archiver,
    source: &'a DocumentReference,
    target: &'a DocumentReference,
}

impl StagedCopy<'_> {
    fn commit(self) {
        info!(key = %self.source.key, archive = %self.target.key, "Document archived");
    }

    async fn rollback(self, detail: &str) -> IngestError {
        let archive_present = self.archiver.remove_staged(self.target).await;
        let source_present = !matches!(
            self.archiver
                .store
                .head(&self.source.bucket, &self.source.key)
                .await,
            Ok(None)
        );
        warn!(
            key = %self.source.key,
            archive = %self.target.key,
            source_present,
            archive_present,
            "Archival rolled back: {detail}"
        );
        self.archiver
            .failure(self.source, detail, source_present, archive_present)
    }

    fn keep(self, detail: &str) -> IngestError {
        warn!(
            key = %self.source.key,
            archive = %self.target.key,
            "Archive copy kept: {detail}"
        );
        self.archiver.failure(self.source, detail, false, true)
    }
}
