//! Field extraction: submit an analysis job, wait for it, persist the record.
//!
//! ## Waiting
//!
//! The poll loop is the only place a run suspends. It sleeps with
//! `tokio::time::sleep`, so a waiting run yields its worker thread and other
//! runs keep going. Waits follow [`PollSchedule`]; when the schedule is
//! exhausted the stage fails with [`IngestError::PollTimeout`] instead of
//! polling forever.
//!
//! ## Writes
//!
//! The record is written exactly once, after the job succeeded and the
//! result parsed cleanly. Any failure before that point leaves the results
//! prefix untouched. The output key depends only on the record and the
//! source, so a re-run overwrites the same object with the same bytes.

use super::blocks::match_answers;
use super::persist::{output_key, render};
use super::poll::PollSchedule;
use crate::analysis::{AnalysisService, JobId, JobStatus};
use crate::config::{OutputFormat, PipelineConfig, PollPolicy};
use crate::error::IngestError;
use crate::model::{DocumentReference, ExtractionRecord, FieldQuery};
use crate::storage::ObjectStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Result of a successful extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub job_id: JobId,
    pub record: ExtractionRecord,
    /// Where the rendered record was written.
    pub output: DocumentReference,
    /// True when the job finished with `PARTIAL_SUCCESS` and that was accepted.
    pub partial: bool,
}

/// Drives one analysis job per document and persists the outcome.
#[derive(Clone)]
pub struct Extractor {
    analysis: Arc<dyn AnalysisService>,
    store: Arc<dyn ObjectStore>,
    queries: Vec<FieldQuery>,
    poll: PollPolicy,
    results_prefix: String,
    results_bucket: Option<String>,
    identifier_alias: Option<String>,
    format: OutputFormat,
    accept_partial: bool,
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("queries", &self.queries.len())
            .field("poll", &self.poll)
            .field("results_prefix", &self.results_prefix)
            .field("format", &self.format)
            .finish()
    }
}

impl Extractor {
    pub fn new(
        analysis: Arc<dyn AnalysisService>,
        store: Arc<dyn ObjectStore>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            analysis,
            store,
            queries: config.queries.clone(),
            poll: config.poll,
            results_prefix: config.results_prefix.clone(),
            results_bucket: config.results_bucket.clone(),
            identifier_alias: config.identifier_alias.clone(),
            format: config.output_format,
            accept_partial: config.accept_partial,
        }
    }

    pub fn queries(&self) -> &[FieldQuery] {
        &self.queries
    }

    /// Run extraction for `document` end to end.
    ///
    /// # Errors
    /// - [`IngestError::PollTimeout`] when the job is still pending after the
    ///   poll budget
    /// - [`IngestError::ExtractionFailed`] when the job fails (or finishes
    ///   partially without `accept_partial`)
    /// - [`IngestError::UnknownQueryAlias`] / [`IngestError::MissingRequiredField`]
    ///   when the result breaks the query contract
    /// - [`IngestError::Analysis`] / [`IngestError::Storage`] from collaborators
    pub async fn extract(&self, document: &DocumentReference) -> Result<Extraction, IngestError> {
        let start = Instant::now();
        let job_id = self.analysis.submit(document, &self.queries).await?;
        info!(job_id = %job_id, key = %document.key, queries = self.queries.len(), "Submitted analysis job");

        let (blocks, partial) = match self.wait_for_job(&job_id).await? {
            JobStatus::Succeeded { blocks } => (blocks, false),
            JobStatus::PartialSuccess { blocks, message } if self.accept_partial => {
                warn!(job_id = %job_id, %message, "Accepting partially successful analysis job");
                (blocks, true)
            }
            JobStatus::PartialSuccess { message, .. } => {
                return Err(IngestError::ExtractionFailed {
                    key: document.key.clone(),
                    job_id: Some(job_id.0),
                    reason: format!("job finished partially: {message}"),
                });
            }
            JobStatus::Failed { reason } => {
                return Err(IngestError::ExtractionFailed {
                    key: document.key.clone(),
                    job_id: Some(job_id.0),
                    reason,
                });
            }
            JobStatus::Pending => {
                return Err(IngestError::Internal(
                    "poll loop returned a pending job".to_string(),
                ));
            }
        };

        let record = match_answers(&blocks, &self.queries)?;
        self.check_required(document, &record)?;

        let output = self.persist(document, &record).await?;
        info!(
            job_id = %job_id,
            key = %document.key,
            output = %output.key,
            fields = record.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Extraction complete"
        );

        Ok(Extraction {
            job_id,
            record,
            output,
            partial,
        })
    }

    /// Poll `job` until it reaches a terminal status or the budget runs out.
    async fn wait_for_job(&self, job: &JobId) -> Result<JobStatus, IngestError> {
        let mut schedule = PollSchedule::new(self.poll);
        loop {
            let status = self.analysis.poll(job).await?;
            if status.is_terminal() {
                return Ok(status);
            }
            match schedule.next() {
                Some(delay) => {
                    debug!(
                        job_id = %job,
                        attempt = schedule.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "Analysis job pending"
                    );
                    sleep(delay).await;
                }
                None => {
                    return Err(IngestError::PollTimeout {
                        job_id: job.0.clone(),
                        waited_ms: schedule.waited().as_millis() as u64,
                        polls: schedule.attempts() + 1,
                    });
                }
            }
        }
    }

    fn check_required(
        &self,
        document: &DocumentReference,
        record: &ExtractionRecord,
    ) -> Result<(), IngestError> {
        match self
            .queries
            .iter()
            .find(|q| q.required && record.answer(&q.alias).is_none())
        {
            Some(missing) => Err(IngestError::MissingRequiredField {
                key: document.key.clone(),
                alias: missing.alias.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn persist(
        &self,
        document: &DocumentReference,
        record: &ExtractionRecord,
    ) -> Result<DocumentReference, IngestError> {
        let bytes = render(record, document, self.format)?;
        let key = output_key(
            &self.results_prefix,
            record,
            self.identifier_alias.as_deref(),
            document,
            self.format,
        );
        let bucket = self
            .results_bucket
            .clone()
            .unwrap_or_else(|| document.bucket.clone());

        self.store
            .put(&bucket, &key, bytes, self.format.content_type())
            .await?;
        Ok(DocumentReference::new(bucket, key))
    }
}
