//! Output types returned by the workflow controller.

use crate::error::FailureReason;
use crate::model::{DocumentReference, ExtractionRecord, ValidationResult};
use crate::workflow::RunState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One state change of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: RunState,
    pub to: RunState,
}

/// Everything known about one finished run.
///
/// Produced for every run, successful or not. A batch never stops at the
/// first failed document; inspect `state` and `failure` per report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique per run; re-delivered notifications get a fresh id.
    pub run_id: Uuid,

    /// The document that triggered the run.
    pub document: DocumentReference,

    /// Terminal state the run ended in.
    pub state: RunState,

    /// Every state change in order, starting from `Validating`.
    pub transitions: Vec<Transition>,

    /// Set once validation completed (absent for malformed references).
    pub validation: Option<ValidationResult>,

    /// Set when extraction succeeded.
    pub record: Option<ExtractionRecord>,

    /// Where the extraction record was written.
    pub results_location: Option<DocumentReference>,

    /// Analysis job that produced `record`.
    pub job_id: Option<String>,

    /// True when the analysis job finished partially and that was accepted.
    pub partial: bool,

    /// New location of the document after archival.
    pub archived_to: Option<DocumentReference>,

    /// Why the run failed. `None` for `Succeeded`.
    pub failure: Option<FailureReason>,

    /// Wall-clock time of the run.
    pub duration_ms: u64,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Succeeded
    }

    /// Where the document lives after the run.
    pub fn document_location(&self) -> &DocumentReference {
        self.archived_to.as_ref().unwrap_or(&self.document)
    }
}

/// Aggregate counts over a batch of reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total: usize,
    pub succeeded: usize,
    pub invalid: usize,
    pub extraction_failed: usize,
    pub archival_failed: usize,
    pub total_duration_ms: u64,
}

impl BatchStats {
    pub fn from_reports<'a>(reports: impl IntoIterator<Item = &'a RunReport>) -> Self {
        let mut stats = BatchStats::default();
        for r in reports {
            stats.total += 1;
            stats.total_duration_ms += r.duration_ms;
            match r.state {
                RunState::Succeeded => stats.succeeded += 1,
                RunState::Invalid => stats.invalid += 1,
                RunState::ExtractionFailed => stats.extraction_failed += 1,
                RunState::ArchivalFailed => stats.archival_failed += 1,
                RunState::Validating | RunState::Extracting | RunState::Archiving => {}
            }
        }
        stats
    }

    pub fn failed(&self) -> usize {
        self.invalid + self.extraction_failed + self.archival_failed
    }
}
