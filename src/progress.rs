//! Progress-callback trait for workflow events.
//!
//! Inject an [`Arc<dyn WorkflowProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as runs start, move between states, and finish.
//!
//! # Example
//!
//! ```rust
//! use edgequake_ingest::{PipelineConfig, RunReport, WorkflowProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     finished: AtomicUsize,
//! }
//!
//! impl WorkflowProgressCallback for CountingCallback {
//!     fn on_run_complete(&self, report: &RunReport) {
//!         let done = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{done}: {} → {:?}", report.document, report.state);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { finished: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::model::DocumentReference;
use crate::output::RunReport;
use crate::workflow::RunState;
use std::sync::Arc;
use uuid::Uuid;

/// Called by the workflow controller as runs progress.
///
/// Implementations must be `Send + Sync`: batch entry points drive several
/// runs at once, so methods may be called concurrently for different runs.
/// All methods default to no-ops.
pub trait WorkflowProgressCallback: Send + Sync {
    /// Called once before a batch starts.
    ///
    /// # Arguments
    /// * `total_runs`: number of documents in the batch
    fn on_batch_start(&self, total_runs: usize) {
        let _ = total_runs;
    }

    /// Called when a run enters `Validating`.
    fn on_run_start(&self, run_id: Uuid, document: &DocumentReference) {
        let _ = (run_id, document);
    }

    /// Called for every state change of a run.
    fn on_transition(&self, run_id: Uuid, from: RunState, to: RunState) {
        let _ = (run_id, from, to);
    }

    /// Called once when a run reaches a terminal state.
    fn on_run_complete(&self, report: &RunReport) {
        let _ = report;
    }

    /// Called once after every run of a batch finished.
    ///
    /// # Arguments
    /// * `total_runs`: runs in the batch
    /// * `succeeded`: runs that reached `Succeeded`
    fn on_batch_complete(&self, total_runs: usize, succeeded: usize) {
        let _ = (total_runs, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl WorkflowProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn WorkflowProgressCallback>;
