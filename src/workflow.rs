//! The workflow controller: a deterministic state machine per document.
//!
//! ```text
//!             ┌──────────▶ Invalid
//!             │ rejected / malformed
//! Validating ─┴▶ Extracting ─┬──────────▶ ExtractionFailed
//!                            │ job failed / timeout / contract violation
//!                            └▶ Archiving ─┬──────────▶ ArchivalFailed
//!                                          └▶ Succeeded
//! ```
//!
//! Each stage reports a [`StepOutcome`]; [`RunState::next`] is the only place
//! a state changes. Terminal states are absorbing. The controller never
//! retries a stage; the extractor's bounded poll loop is the only retry in
//! the system.
//!
//! Runs share nothing mutable: [`Workflow::run_batch`] drives many runs at
//! once, and a run waiting on its analysis job yields to the others.

use crate::analysis::AnalysisService;
use crate::config::PipelineConfig;
use crate::error::{FailureReason, IngestError};
use crate::event::{parse_notification, TriggerFilter};
use crate::model::{DocumentReference, ExtractionRecord, ValidationResult};
use crate::output::{RunReport, Transition};
use crate::pipeline::archive::Archiver;
use crate::pipeline::extract::{Extraction, Extractor};
use crate::pipeline::validate::Validator;
use crate::storage::ObjectStore;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ── State machine ────────────────────────────────────────────────────────

/// State of one workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Validating,
    Extracting,
    Archiving,
    /// Terminal: the document was rejected or its reference was malformed.
    Invalid,
    /// Terminal: extraction failed; the document stays in landing.
    ExtractionFailed,
    /// Terminal: the archive move failed.
    ArchivalFailed,
    /// Terminal: extracted, persisted and archived.
    Succeeded,
}

/// Result of executing the stage that belongs to a state.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The stage finished; move on to the next one.
    Proceed,
    /// The stage failed or rejected the document.
    Fail(FailureReason),
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Invalid
                | RunState::ExtractionFailed
                | RunState::ArchivalFailed
                | RunState::Succeeded
        )
    }

    /// The state that follows `self` given the stage outcome.
    pub fn next(self, outcome: &StepOutcome) -> RunState {
        use RunState::*;
        match (self, outcome) {
            (s, _) if s.is_terminal() => s,
            (Validating, StepOutcome::Proceed) => Extracting,
            (Validating, StepOutcome::Fail(_)) => Invalid,
            (Extracting, StepOutcome::Proceed) => Archiving,
            (Extracting, StepOutcome::Fail(_)) => ExtractionFailed,
            (Archiving, StepOutcome::Proceed) => Succeeded,
            (Archiving, StepOutcome::Fail(_)) => ArchivalFailed,
            (s, _) => s,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Validating => "validating",
            RunState::Extracting => "extracting",
            RunState::Archiving => "archiving",
            RunState::Invalid => "invalid",
            RunState::ExtractionFailed => "extraction_failed",
            RunState::ArchivalFailed => "archival_failed",
            RunState::Succeeded => "succeeded",
        };
        f.write_str(name)
    }
}

// ── Run context ──────────────────────────────────────────────────────────

/// Execution context of one run.
///
/// Lives only for the duration of [`Workflow::run`] and is consumed into a
/// [`RunReport`] when the run reaches a terminal state.
#[derive(Debug)]
pub struct WorkflowRun {
    id: Uuid,
    document: DocumentReference,
    state: RunState,
    transitions: Vec<Transition>,
    validation: Option<ValidationResult>,
    extraction: Option<Extraction>,
    archived_to: Option<DocumentReference>,
    failure: Option<FailureReason>,
    started: Instant,
}

impl WorkflowRun {
    pub fn new(document: DocumentReference) -> Self {
        Self {
            id: Uuid::new_v4(),
            document,
            state: RunState::Validating,
            transitions: Vec::new(),
            validation: None,
            extraction: None,
            archived_to: None,
            failure: None,
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn document(&self) -> &DocumentReference {
        &self.document
    }

    /// Apply a stage outcome and return the transition taken, if any.
    ///
    /// A failure reason is kept only from the outcome that ended the run.
    pub fn apply(&mut self, outcome: StepOutcome) -> Option<Transition> {
        let from = self.state;
        let to = from.next(&outcome);
        if to == from {
            return None;
        }
        if let StepOutcome::Fail(reason) = outcome {
            self.failure = Some(reason);
        }
        self.state = to;
        let transition = Transition { from, to };
        self.transitions.push(transition);
        Some(transition)
    }

    pub fn into_report(self) -> RunReport {
        let (record, results_location, job_id, partial) = match self.extraction {
            Some(Extraction {
                job_id,
                record,
                output,
                partial,
            }) => (Some(record), Some(output), Some(job_id.0), partial),
            None => (None::<ExtractionRecord>, None, None, false),
        };
        RunReport {
            run_id: self.id,
            document: self.document,
            state: self.state,
            transitions: self.transitions,
            validation: self.validation,
            record,
            results_location,
            job_id,
            partial,
            archived_to: self.archived_to,
            failure: self.failure,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

// ── Controller ───────────────────────────────────────────────────────────

/// Sequences validate → extract → archive for each document.
///
/// # Example
///
/// ```rust,no_run
/// use edgequake_ingest::{
///     DocumentReference, HttpAnalysisService, LocalObjectStore, PipelineConfig, Workflow,
/// };
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(LocalObjectStore::new("/srv/buckets").await?);
/// let analysis = Arc::new(HttpAnalysisService::new("http://localhost:8080", 30)?);
/// let workflow = Workflow::new(PipelineConfig::default(), store, analysis)?;
///
/// let report = workflow
///     .run(DocumentReference::new("documents", "landing/cert.pdf"))
///     .await;
/// println!("{} → {}", report.document, report.state);
/// # Ok(())
/// # }
/// ```
pub struct Workflow {
    config: PipelineConfig,
    store: Arc<dyn ObjectStore>,
    validator: Validator,
    extractor: Extractor,
    archiver: Archiver,
    trigger: TriggerFilter,
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("config", &self.config)
            .field("validator", &self.validator)
            .field("trigger", &self.trigger)
            .finish()
    }
}

impl Workflow {
    /// Assemble a workflow, rejecting configs that fail
    /// [`PipelineConfig::validate`].
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn ObjectStore>,
        analysis: Arc<dyn AnalysisService>,
    ) -> Result<Self, IngestError> {
        config.validate()?;
        let validator = Validator::for_extensions(&config.accepted_extensions);
        let extractor = Extractor::new(analysis, Arc::clone(&store), &config);
        let archiver = Archiver::new(
            Arc::clone(&store),
            config.landing_prefix.clone(),
            config.archive_prefix.clone(),
        );
        let trigger = TriggerFilter::from_config(&config);
        Ok(Self {
            config,
            store,
            validator,
            extractor,
            archiver,
            trigger,
        })
    }

    /// Replace the validation policy.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Replace the filter applied to notifications.
    pub fn with_trigger_filter(mut self, trigger: TriggerFilter) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn trigger_filter(&self) -> &TriggerFilter {
        &self.trigger
    }

    /// Run one document to a terminal state.
    ///
    /// Never returns an error: every failure ends the run in a terminal-fail
    /// state and is described by [`RunReport::failure`].
    pub async fn run(&self, document: DocumentReference) -> RunReport {
        let mut run = WorkflowRun::new(document);
        let run_id = run.id();
        info!(%run_id, document = %run.document(), "Run started");
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_run_start(run_id, run.document());
        }

        while !run.state().is_terminal() {
            let outcome = match run.state() {
                RunState::Validating => self.validate_step(&mut run),
                RunState::Extracting => self.extract_step(&mut run).await,
                RunState::Archiving => self.archive_step(&mut run).await,
                terminal => {
                    warn!(%run_id, state = %terminal, "Controller reached a terminal state inside the loop");
                    break;
                }
            };
            if let Some(t) = run.apply(outcome) {
                debug!(%run_id, from = %t.from, to = %t.to, "State transition");
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_transition(run_id, t.from, t.to);
                }
            }
        }

        let report = run.into_report();
        match &report.failure {
            None => info!(
                %run_id,
                document = %report.document,
                state = %report.state,
                duration_ms = report.duration_ms,
                "Run finished"
            ),
            Some(reason) => warn!(
                %run_id,
                document = %report.document,
                state = %report.state,
                duration_ms = report.duration_ms,
                "Run failed: {reason}"
            ),
        }
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_run_complete(&report);
        }
        report
    }

    fn validate_step(&self, run: &mut WorkflowRun) -> StepOutcome {
        match self.validator.validate(run.document()) {
            Ok(result) => {
                let outcome = match (result.valid, &result.rejected_by) {
                    (true, _) => StepOutcome::Proceed,
                    (false, rule) => StepOutcome::Fail(FailureReason::Rejected {
                        rule: rule.clone().unwrap_or_else(|| "unknown".to_string()),
                    }),
                };
                run.validation = Some(result);
                outcome
            }
            Err(IngestError::InvalidInput { detail }) => {
                StepOutcome::Fail(FailureReason::InvalidInput { detail })
            }
            Err(other) => StepOutcome::Fail(FailureReason::InvalidInput {
                detail: other.to_string(),
            }),
        }
    }

    async fn extract_step(&self, run: &mut WorkflowRun) -> StepOutcome {
        match self.extractor.extract(run.document()).await {
            Ok(extraction) => {
                run.extraction = Some(extraction);
                StepOutcome::Proceed
            }
            Err(e) => StepOutcome::Fail(FailureReason::from_extraction(&e)),
        }
    }

    async fn archive_step(&self, run: &mut WorkflowRun) -> StepOutcome {
        match self.archiver.archive(run.document()).await {
            Ok(archived) => {
                run.archived_to = Some(archived);
                StepOutcome::Proceed
            }
            Err(e) => StepOutcome::Fail(FailureReason::from_archival(&e)),
        }
    }

    /// Run many documents concurrently, `config.concurrency` at a time.
    ///
    /// Reports come back in completion order.
    pub async fn run_batch(&self, documents: Vec<DocumentReference>) -> Vec<RunReport> {
        let total = documents.len();
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_start(total);
        }

        let reports: Vec<RunReport> = stream::iter(documents)
            .map(|doc| self.run(doc))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let succeeded = reports.iter().filter(|r| r.is_success()).count();
        info!(total, succeeded, "Batch complete");
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_complete(total, succeeded);
        }
        reports
    }

    /// Documents referenced by a notification that pass the trigger filter.
    ///
    /// # Errors
    /// [`IngestError::InvalidInput`] for a malformed payload; no run starts.
    pub fn triggered_documents(&self, json: &str) -> Result<Vec<DocumentReference>, IngestError> {
        let docs = parse_notification(json)?;
        Ok(docs
            .into_iter()
            .filter(|doc| {
                let matched = self.trigger.matches(doc);
                if !matched {
                    debug!(document = %doc, prefix = self.trigger.prefix(), "Notification outside trigger scope");
                }
                matched
            })
            .collect())
    }

    /// Handle an "object created" notification end to end.
    ///
    /// # Errors
    /// [`IngestError::InvalidInput`] for a malformed payload; no run starts.
    pub async fn handle_notification(&self, json: &str) -> Result<Vec<RunReport>, IngestError> {
        let docs = self.triggered_documents(json)?;
        Ok(self.run_batch(docs).await)
    }

    /// Documents currently waiting under the landing prefix of `bucket`.
    pub async fn scan_landing(&self, bucket: &str) -> Result<Vec<DocumentReference>, IngestError> {
        let keys = self.store.list(bucket, &self.config.landing_prefix).await?;
        Ok(keys
            .into_iter()
            .map(|key| DocumentReference::new(bucket, key))
            .filter(|doc| self.trigger.matches(doc))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [RunState; 7] = [
        RunState::Validating,
        RunState::Extracting,
        RunState::Archiving,
        RunState::Invalid,
        RunState::ExtractionFailed,
        RunState::ArchivalFailed,
        RunState::Succeeded,
    ];

    fn fail() -> StepOutcome {
        StepOutcome::Fail(FailureReason::Extraction {
            detail: "boom".into(),
        })
    }

    #[test]
    fn happy_path() {
        let mut s = RunState::Validating;
        for expected in [RunState::Extracting, RunState::Archiving, RunState::Succeeded] {
            s = s.next(&StepOutcome::Proceed);
            assert_eq!(s, expected);
        }
    }

    #[test]
    fn each_stage_fails_into_its_own_state() {
        assert_eq!(RunState::Validating.next(&fail()), RunState::Invalid);
        assert_eq!(RunState::Extracting.next(&fail()), RunState::ExtractionFailed);
        assert_eq!(RunState::Archiving.next(&fail()), RunState::ArchivalFailed);
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for s in ALL.into_iter().filter(|s| s.is_terminal()) {
            assert_eq!(s.next(&StepOutcome::Proceed), s);
            assert_eq!(s.next(&fail()), s);
        }
        assert_eq!(ALL.iter().filter(|s| s.is_terminal()).count(), 4);
    }

    #[test]
    fn run_records_transitions_and_failure() {
        let mut run = WorkflowRun::new(DocumentReference::new("b", "landing/a.pdf"));
        assert!(run.apply(StepOutcome::Proceed).is_some());
        assert!(run.apply(fail()).is_some());
        assert!(run.apply(StepOutcome::Proceed).is_none());

        let report = run.into_report();
        assert_eq!(report.state, RunState::ExtractionFailed);
        assert_eq!(
            report.transitions,
            vec![
                Transition {
                    from: RunState::Validating,
                    to: RunState::Extracting
                },
                Transition {
                    from: RunState::Extracting,
                    to: RunState::ExtractionFailed
                },
            ]
        );
        assert!(matches!(report.failure, Some(FailureReason::Extraction { .. })));
        assert!(report.record.is_none());
    }

    #[test]
    fn display_matches_serde() {
        for s in ALL {
            let json = serde_json::to_string(&s).unwrap();
            assert_eq!(json.trim_matches('"'), s.to_string());
        }
    }
}
