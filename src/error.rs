//! Error types for the edgequake-ingest library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`IngestError`]: a stage (or the caller's input) could not proceed.
//!   Returned as `Err(IngestError)` from stage functions and from the trigger
//!   parsers. The workflow controller catches it and moves the run into the
//!   terminal-fail state that belongs to the stage that raised it.
//!
//! * [`FailureReason`]: the serialisable summary of why a run ended in a
//!   terminal-fail state. Stored inside [`crate::output::RunReport`] so that
//!   callers can inspect failures per document without losing the batch.
//!
//! Collaborator errors ([`StorageError`], [`AnalysisError`]) convert into
//! [`IngestError`] with `?`.

use crate::analysis::AnalysisError;
use crate::storage::StorageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors returned by the edgequake-ingest library.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Trigger payload or document reference is malformed (missing bucket or
    /// key, unparsable JSON, key without a file name).
    #[error("Invalid input: {detail}")]
    InvalidInput { detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The analysis job reported failure, or returned an unusable result.
    #[error("Extraction failed for '{key}': {reason}")]
    ExtractionFailed {
        key: String,
        job_id: Option<String>,
        reason: String,
    },

    /// The analysis result contains a query alias that was never submitted.
    #[error("Analysis result references unknown query alias '{alias}'")]
    UnknownQueryAlias { alias: String },

    /// A query marked as required came back without an answer.
    #[error("Required field '{alias}' was not found in '{key}'")]
    MissingRequiredField { key: String, alias: String },

    /// The analysis job did not finish within the poll budget.
    #[error("Analysis job '{job_id}' still pending after {waited_ms}ms ({polls} polls)")]
    PollTimeout {
        job_id: String,
        waited_ms: u64,
        polls: u32,
    },

    // ── Archival errors ───────────────────────────────────────────────────
    /// Moving the document to the archive prefix failed.
    ///
    /// `source_present` / `archive_present` report where live copies exist
    /// after the archiver finished cleaning up.
    #[error("Archival of '{key}' failed: {detail}")]
    ArchivalFailed {
        key: String,
        detail: String,
        source_present: bool,
        archive_present: bool,
    },

    // ── Collaborator errors ───────────────────────────────────────────────
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// A record or payload could not be (de)serialised.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    pub(crate) fn invalid_input(detail: impl Into<String>) -> Self {
        IngestError::InvalidInput {
            detail: detail.into(),
        }
    }

    /// True for the poll-budget variant, which callers treat as an
    /// extraction failure subtype.
    pub fn is_timeout(&self) -> bool {
        matches!(self, IngestError::PollTimeout { .. })
    }
}

/// Why a run ended in a terminal-fail state.
///
/// Stored in [`crate::output::RunReport`]. `Rejected` is not an error: it
/// records which validation rule turned the document away.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The document reference itself was malformed.
    #[error("invalid input: {detail}")]
    InvalidInput { detail: String },

    /// A validation rule rejected the document.
    #[error("rejected by rule '{rule}'")]
    Rejected { rule: String },

    /// Extraction failed (job failure, unknown alias, missing field, storage).
    #[error("extraction failed: {detail}")]
    Extraction { detail: String },

    /// Extraction ran out of poll budget.
    #[error("analysis job '{job_id}' timed out after {waited_ms}ms")]
    Timeout { job_id: String, waited_ms: u64 },

    /// The archive move failed.
    #[error("archival failed: {detail}")]
    Archival {
        detail: String,
        source_present: bool,
        archive_present: bool,
    },
}

impl FailureReason {
    /// Summarise an error raised by the extraction stage.
    pub fn from_extraction(err: &IngestError) -> Self {
        match err {
            IngestError::PollTimeout {
                job_id, waited_ms, ..
            } => FailureReason::Timeout {
                job_id: job_id.clone(),
                waited_ms: *waited_ms,
            },
            other => FailureReason::Extraction {
                detail: other.to_string(),
            },
        }
    }

    /// Summarise an error raised by the archival stage.
    pub fn from_archival(err: &IngestError) -> Self {
        match err {
            IngestError::ArchivalFailed {
                detail,
                source_present,
                archive_present,
                ..
            } => FailureReason::Archival {
                detail: detail.clone(),
                source_present: *source_present,
                archive_present: *archive_present,
            },
            other => FailureReason::Archival {
                detail: other.to_string(),
                source_present: true,
                archive_present: false,
            },
        }
    }
}
