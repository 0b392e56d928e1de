//! Streaming batch API: emit run reports as runs finish.
//!
//! ## Why stream?
//!
//! A landing scan can turn up hundreds of documents, each waiting minutes on
//! its analysis job. A stream lets callers print, persist or forward each
//! report the moment its run ends instead of holding the whole batch.
//!
//! Unlike [`crate::workflow::Workflow::run_batch`], which returns only after
//! every run finished, [`run_stream`] yields [`RunReport`]s in completion
//! order. Batch progress callbacks (`on_batch_start` / `on_batch_complete`)
//! are not fired here since the stream has no natural end for the caller.

use crate::model::DocumentReference;
use crate::output::RunReport;
use crate::workflow::Workflow;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of run reports.
pub type RunStream = Pin<Box<dyn Stream<Item = RunReport> + Send>>;

/// Run `documents` through `workflow`, streaming reports as they complete.
///
/// At most `config.concurrency` runs are in flight at once.
pub fn run_stream(workflow: Arc<Workflow>, documents: Vec<DocumentReference>) -> RunStream {
    let concurrency = workflow.config().concurrency;
    info!(documents = documents.len(), concurrency, "Starting streaming batch");

    let s = stream::iter(documents.into_iter().map(move |doc| {
        let workflow = Arc::clone(&workflow);
        async move { workflow.run(doc).await }
    }))
    .buffer_unordered(concurrency);

    Box::pin(s)
}
