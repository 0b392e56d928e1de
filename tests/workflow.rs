//! Workflow integration tests against the in-memory store and a scripted
//! analysis service.

mod common;

use common::*;
use edgequake_ingest::{
    run_stream, Block, DocumentReference, ExtractionRecord, FailureReason, FieldQuery,
    InMemoryObjectStore, JobStatus, OutputFormat, PipelineConfig, PollPolicy, RunReport, RunState,
    Transition, Workflow, WorkflowProgressCallback,
};
use edgequake_ingest::storage::StoreOp;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn setup(
    config: PipelineConfig,
    analysis: ScriptedAnalysisService,
) -> (Workflow, Arc<InMemoryObjectStore>, Arc<ScriptedAnalysisService>) {
    let store = Arc::new(InMemoryObjectStore::new());
    let analysis = Arc::new(analysis);
    let workflow = Workflow::new(config, store.clone(), analysis.clone()).unwrap();
    (workflow, store, analysis)
}

fn keys_under(store: &InMemoryObjectStore, prefix: &str) -> Vec<String> {
    store
        .keys(BUCKET)
        .into_iter()
        .filter(|k| k.starts_with(prefix))
        .collect()
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn certificate_is_extracted_and_archived() {
    let (workflow, store, analysis) = setup(cert_config(), ScriptedAnalysisService::succeeding(cert_blocks()));
    store.insert(BUCKET, "landing/cert.pdf", "%PDF-1.7 cert");

    let report = workflow.run(doc("landing/cert.pdf")).await;

    assert_eq!(report.state, RunState::Succeeded, "failure: {:?}", report.failure);
    assert!(report.failure.is_none());

    let record = report.record.as_ref().unwrap();
    assert_eq!(record.len(), 2);
    let cert_no = record.get("cert_no").unwrap();
    assert_eq!(cert_no.answer.as_deref(), Some("AB-123"));
    assert_eq!(cert_no.confidence, 98.0);
    let expiration = record.get("expiration").unwrap();
    assert_eq!(expiration.answer.as_deref(), Some("2030-01-01"));
    assert_eq!(expiration.confidence, 91.0);

    assert_eq!(report.archived_to, Some(doc("archive/cert.pdf")));
    assert!(!store.contains(BUCKET, "landing/cert.pdf"));
    assert_eq!(store.object(BUCKET, "archive/cert.pdf").unwrap(), b"%PDF-1.7 cert");

    assert_eq!(report.results_location, Some(doc("data/AB-123.json")));
    let persisted: serde_json::Value =
        serde_json::from_slice(&store.object(BUCKET, "data/AB-123.json").unwrap()).unwrap();
    assert_eq!(persisted["queries"]["cert_no"]["answer"], "AB-123");
    assert_eq!(persisted["queries"]["expiration"]["confidence"], 91.0);

    assert_eq!(
        report.transitions,
        vec![
            Transition { from: RunState::Validating, to: RunState::Extracting },
            Transition { from: RunState::Extracting, to: RunState::Archiving },
            Transition { from: RunState::Archiving, to: RunState::Succeeded },
        ]
    );
    assert_eq!(report.job_id.as_deref(), Some("job-1"));
    assert_eq!(analysis.submits(), 1);
    let (submitted_doc, submitted_queries) = &analysis.submitted()[0];
    assert_eq!(submitted_doc, &doc("landing/cert.pdf"));
    assert_eq!(submitted_queries, &cert_queries());
}

#[tokio::test]
async fn non_pdf_ends_invalid_without_calling_later_stages() {
    let (workflow, store, analysis) = setup(cert_config(), ScriptedAnalysisService::succeeding(cert_blocks()));
    store.insert(BUCKET, "landing/notes.txt", "hello");

    let report = workflow.run(doc("landing/notes.txt")).await;

    assert_eq!(report.state, RunState::Invalid);
    assert_eq!(
        report.failure,
        Some(FailureReason::Rejected { rule: "extension".into() })
    );
    let validation = report.validation.as_ref().unwrap();
    assert!(!validation.valid);

    assert_eq!(analysis.submits(), 0);
    assert_eq!(analysis.polls(), 0);
    assert_eq!(store.call_count(StoreOp::Copy), 0);
    assert_eq!(store.call_count(StoreOp::Delete), 0);
    assert_eq!(store.call_count(StoreOp::Put), 0);
    assert!(store.contains(BUCKET, "landing/notes.txt"));
    assert!(report.archived_to.is_none());
}

#[tokio::test]
async fn malformed_reference_ends_invalid_with_input_reason() {
    let (workflow, _store, analysis) = setup(cert_config(), ScriptedAnalysisService::succeeding(cert_blocks()));

    let report = workflow.run(DocumentReference::new(BUCKET, "landing/")).await;

    assert_eq!(report.state, RunState::Invalid);
    assert!(matches!(report.failure, Some(FailureReason::InvalidInput { .. })));
    assert!(report.validation.is_none());
    assert_eq!(analysis.submits(), 0);
}

#[tokio::test(start_paused = true)]
async fn pending_job_times_out_and_document_stays_in_landing() {
    let config = PipelineConfig::builder()
        .queries(cert_queries())
        .identifier_alias("cert_no")
        .poll(PollPolicy {
            increment: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_total_wait: Duration::from_secs(30),
        })
        .build()
        .unwrap();
    let (workflow, store, analysis) = setup(config, ScriptedAnalysisService::new(vec![JobStatus::Pending]));
    store.insert(BUCKET, "landing/cert.pdf", "%PDF");

    let report = workflow.run(doc("landing/cert.pdf")).await;

    assert_eq!(report.state, RunState::ExtractionFailed);
    assert_eq!(
        report.failure,
        Some(FailureReason::Timeout { job_id: "job-1".into(), waited_ms: 30_000 })
    );
    // Waits 1..=7 s (28 s) then a clipped 2 s: one poll up front plus one per wait.
    assert_eq!(analysis.polls(), 9);
    assert!(store.contains(BUCKET, "landing/cert.pdf"));
    assert!(keys_under(&store, "archive/").is_empty());
    assert!(keys_under(&store, "data/").is_empty());
}

#[test]
fn workflow_rejects_unbounded_poll_policy() {
    let mut config = cert_config();
    config.poll = PollPolicy {
        increment: Duration::ZERO,
        max_delay: Duration::ZERO,
        max_total_wait: Duration::from_millis(50),
    };
    let result = Workflow::new(
        config,
        Arc::new(InMemoryObjectStore::new()),
        Arc::new(ScriptedAnalysisService::new(vec![JobStatus::Pending])),
    );
    assert!(matches!(result, Err(edgequake_ingest::IngestError::InvalidConfig(_))));
}

#[tokio::test(start_paused = true)]
async fn job_finishing_after_a_few_polls_succeeds() {
    let script = vec![
        JobStatus::Pending,
        JobStatus::Pending,
        JobStatus::Succeeded { blocks: cert_blocks() },
    ];
    let (workflow, store, analysis) = setup(cert_config(), ScriptedAnalysisService::new(script));
    store.insert(BUCKET, "landing/cert.pdf", "%PDF");

    let report = workflow.run(doc("landing/cert.pdf")).await;

    assert!(report.is_success(), "failure: {:?}", report.failure);
    assert_eq!(analysis.polls(), 3);
}

#[tokio::test]
async fn failed_job_is_not_archived() {
    let (workflow, store, _analysis) = setup(
        cert_config(),
        ScriptedAnalysisService::new(vec![JobStatus::Failed {
            reason: "UNSUPPORTED_DOCUMENT".into(),
        }]),
    );
    store.insert(BUCKET, "landing/cert.pdf", "%PDF");

    let report = workflow.run(doc("landing/cert.pdf")).await;

    assert_eq!(report.state, RunState::ExtractionFailed);
    match &report.failure {
        Some(FailureReason::Extraction { detail }) => {
            assert!(detail.contains("UNSUPPORTED_DOCUMENT"), "got: {detail}")
        }
        other => panic!("unexpected failure: {other:?}"),
    }
    assert!(store.contains(BUCKET, "landing/cert.pdf"));
    assert_eq!(store.call_count(StoreOp::Copy), 0);
    assert!(keys_under(&store, "data/").is_empty());
}

#[tokio::test]
async fn unknown_alias_fails_extraction_without_write() {
    let mut blocks = cert_blocks();
    blocks.push(Block::query("q3", "surprise", "Who signed?", &["r3"]));
    blocks.push(Block::query_result("r3", "Nobody", 80.0));
    let (workflow, store, _analysis) = setup(cert_config(), ScriptedAnalysisService::succeeding(blocks));
    store.insert(BUCKET, "landing/cert.pdf", "%PDF");

    let report = workflow.run(doc("landing/cert.pdf")).await;

    assert_eq!(report.state, RunState::ExtractionFailed);
    match &report.failure {
        Some(FailureReason::Extraction { detail }) => assert!(detail.contains("surprise")),
        other => panic!("unexpected failure: {other:?}"),
    }
    assert_eq!(store.call_count(StoreOp::Put), 0);
    assert!(store.contains(BUCKET, "landing/cert.pdf"));
}

#[tokio::test]
async fn missing_required_field_fails_extraction() {
    let config = PipelineConfig::builder()
        .queries(vec![
            FieldQuery::new("What is the certificate number?", "cert_no").required(true),
            FieldQuery::new("When does this certificate expire?", "expiration"),
        ])
        .identifier_alias("cert_no")
        .poll(fast_poll())
        .build()
        .unwrap();
    let blocks = vec![
        Block::query("q1", "cert_no", "What is the certificate number?", &[]),
        Block::query("q2", "expiration", "When does this certificate expire?", &["r2"]),
        Block::query_result("r2", "2030-01-01", 91.0),
    ];
    let (workflow, store, _analysis) = setup(config, ScriptedAnalysisService::succeeding(blocks));
    store.insert(BUCKET, "landing/cert.pdf", "%PDF");

    let report = workflow.run(doc("landing/cert.pdf")).await;

    assert_eq!(report.state, RunState::ExtractionFailed);
    match &report.failure {
        Some(FailureReason::Extraction { detail }) => assert!(detail.contains("cert_no")),
        other => panic!("unexpected failure: {other:?}"),
    }
    assert!(keys_under(&store, "data/").is_empty());
}

#[tokio::test]
async fn unanswered_optional_field_is_recorded_with_zero_confidence() {
    let blocks = vec![
        Block::query("q1", "cert_no", "What is the certificate number?", &["r1"]),
        Block::query_result("r1", "AB-123", 98.0),
    ];
    let (workflow, store, _analysis) = setup(cert_config(), ScriptedAnalysisService::succeeding(blocks));
    store.insert(BUCKET, "landing/cert.pdf", "%PDF");

    let report = workflow.run(doc("landing/cert.pdf")).await;

    assert!(report.is_success());
    let record: &ExtractionRecord = report.record.as_ref().unwrap();
    assert_eq!(record.aliases().collect::<Vec<_>>(), vec!["cert_no", "expiration"]);
    let expiration = record.get("expiration").unwrap();
    assert_eq!(expiration.answer, None);
    assert_eq!(expiration.confidence, 0.0);
}

#[tokio::test]
async fn partial_success_needs_opt_in() {
    let partial = || {
        ScriptedAnalysisService::new(vec![JobStatus::PartialSuccess {
            blocks: cert_blocks(),
            message: "page 2 unreadable".into(),
        }])
    };

    let (workflow, store, _) = setup(cert_config(), partial());
    store.insert(BUCKET, "landing/cert.pdf", "%PDF");
    let rejected = workflow.run(doc("landing/cert.pdf")).await;
    assert_eq!(rejected.state, RunState::ExtractionFailed);
    assert!(store.contains(BUCKET, "landing/cert.pdf"));

    let config = PipelineConfig::builder()
        .queries(cert_queries())
        .identifier_alias("cert_no")
        .accept_partial(true)
        .build()
        .unwrap();
    let (workflow, store, _) = setup(config, partial());
    store.insert(BUCKET, "landing/cert.pdf", "%PDF");
    let accepted = workflow.run(doc("landing/cert.pdf")).await;
    assert_eq!(accepted.state, RunState::Succeeded);
    assert!(accepted.partial);
}

// ── Archival guarantees ──────────────────────────────────────────────────────

#[tokio::test]
async fn delete_failure_leaves_exactly_one_copy() {
    let (workflow, store, _) = setup(cert_config(), ScriptedAnalysisService::succeeding(cert_blocks()));
    store.insert(BUCKET, "landing/cert.pdf", "%PDF");
    store.fail_always(StoreOp::Delete, "landing/cert.pdf");

    let report = workflow.run(doc("landing/cert.pdf")).await;

    assert_eq!(report.state, RunState::ArchivalFailed);
    assert_eq!(
        report.failure.as_ref().map(|f| matches!(
            f,
            FailureReason::Archival { source_present: true, archive_present: false, .. }
        )),
        Some(true),
        "got {:?}",
        report.failure
    );
    assert!(store.contains(BUCKET, "landing/cert.pdf"));
    assert!(!store.contains(BUCKET, "archive/cert.pdf"));
    // The extraction record was written before archival started.
    assert!(store.contains(BUCKET, "data/AB-123.json"));
}

#[tokio::test]
async fn applied_delete_with_lost_response_keeps_the_archive_copy() {
    let (workflow, store, _) = setup(cert_config(), ScriptedAnalysisService::succeeding(cert_blocks()));
    store.insert(BUCKET, "landing/cert.pdf", "%PDF");
    store.fail_after_apply(StoreOp::Delete, "landing/cert.pdf");

    let report = workflow.run(doc("landing/cert.pdf")).await;

    assert_eq!(report.state, RunState::Succeeded, "failure: {:?}", report.failure);
    assert_eq!(report.archived_to, Some(doc("archive/cert.pdf")));
    assert!(!store.contains(BUCKET, "landing/cert.pdf"));
    assert_eq!(store.object(BUCKET, "archive/cert.pdf").unwrap(), b"%PDF");
}

#[tokio::test]
async fn copy_failure_keeps_source() {
    let (workflow, store, _) = setup(cert_config(), ScriptedAnalysisService::succeeding(cert_blocks()));
    store.insert(BUCKET, "landing/cert.pdf", "%PDF");
    store.fail_always(StoreOp::Copy, "landing/cert.pdf");

    let report = workflow.run(doc("landing/cert.pdf")).await;

    assert_eq!(report.state, RunState::ArchivalFailed);
    assert!(store.contains(BUCKET, "landing/cert.pdf"));
    assert!(!store.contains(BUCKET, "archive/cert.pdf"));
    assert_eq!(store.call_count(StoreOp::Delete), 1, "only the staged-copy cleanup may delete");
}

#[tokio::test]
async fn verify_failure_removes_staged_copy() {
    let (workflow, store, _) = setup(cert_config(), ScriptedAnalysisService::succeeding(cert_blocks()));
    store.insert(BUCKET, "landing/cert.pdf", "%PDF");
    store.fail_always(StoreOp::Head, "archive/cert.pdf");

    let report = workflow.run(doc("landing/cert.pdf")).await;

    assert_eq!(report.state, RunState::ArchivalFailed);
    assert!(store.contains(BUCKET, "landing/cert.pdf"));
    assert!(!store.contains(BUCKET, "archive/cert.pdf"));
}

#[tokio::test]
async fn failed_cleanup_reports_both_copies() {
    let (workflow, store, _) = setup(cert_config(), ScriptedAnalysisService::succeeding(cert_blocks()));
    store.insert(BUCKET, "landing/cert.pdf", "%PDF");
    store.fail_always(StoreOp::Delete, "landing/cert.pdf");
    store.fail_always(StoreOp::Delete, "archive/cert.pdf");

    let report = workflow.run(doc("landing/cert.pdf")).await;

    assert_eq!(report.state, RunState::ArchivalFailed);
    match report.failure {
        Some(FailureReason::Archival { source_present, archive_present, .. }) => {
            assert!(source_present);
            assert!(archive_present);
        }
        other => panic!("unexpected failure: {other:?}"),
    }
    // Never zero copies.
    assert!(store.contains(BUCKET, "landing/cert.pdf"));
}

// ── Idempotence ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn rerun_produces_byte_identical_output() {
    for format in [OutputFormat::Json, OutputFormat::Csv] {
        let config = PipelineConfig::builder()
            .queries(cert_queries())
            .identifier_alias("cert_no")
            .output_format(format)
            .build()
            .unwrap();
        let (workflow, store, _) = setup(config, ScriptedAnalysisService::succeeding(cert_blocks()));

        store.insert(BUCKET, "landing/cert.pdf", "%PDF");
        let first = workflow.run(doc("landing/cert.pdf")).await;
        let location = first.results_location.clone().unwrap();
        let first_bytes = store.object(BUCKET, &location.key).unwrap();

        store.insert(BUCKET, "landing/cert.pdf", "%PDF");
        let second = workflow.run(doc("landing/cert.pdf")).await;

        assert!(first.is_success() && second.is_success());
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(second.results_location, Some(location.clone()));
        assert_eq!(store.object(BUCKET, &location.key).unwrap(), first_bytes);
        assert_eq!(keys_under(&store, "data/").len(), 1, "{format:?}");
        assert_eq!(keys_under(&store, "archive/"), vec!["archive/cert.pdf"]);
    }
}

#[tokio::test]
async fn redelivered_notification_is_safe() {
    let (workflow, store, _) = setup(cert_config(), ScriptedAnalysisService::succeeding(cert_blocks()));
    store.insert(BUCKET, "landing/cert.pdf", "%PDF");
    let event = r#"{"detail-type":"Object Created",
        "detail":{"bucket":{"name":"docs"},"object":{"key":"landing/cert.pdf"}}}"#;

    let first = assert_ok!(workflow.handle_notification(event).await);
    let second = assert_ok!(workflow.handle_notification(event).await);

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert!(first[0].is_success());
    assert!(second[0].is_success(), "failure: {:?}", second[0].failure);
    assert_eq!(second[0].archived_to, Some(doc("archive/cert.pdf")));
    assert_eq!(keys_under(&store, "archive/"), vec!["archive/cert.pdf"]);
    assert!(!store.contains(BUCKET, "landing/cert.pdf"));
}

// ── Triggers and batches ─────────────────────────────────────────────────────

#[tokio::test]
async fn notifications_outside_landing_start_no_run() {
    let (workflow, store, analysis) = setup(cert_config(), ScriptedAnalysisService::succeeding(cert_blocks()));
    store.insert(BUCKET, "archive/cert.pdf", "%PDF");

    let reports = assert_ok!(
        workflow
            .handle_notification(
                r#"{"Records":[{"eventName":"ObjectCreated:Copy",
                    "s3":{"bucket":{"name":"docs"},"object":{"key":"archive/cert.pdf"}}}]}"#
            )
            .await
    );

    assert!(reports.is_empty());
    assert_eq!(analysis.submits(), 0);
}

#[tokio::test]
async fn malformed_notification_is_an_input_error() {
    let (workflow, _store, analysis) = setup(cert_config(), ScriptedAnalysisService::succeeding(cert_blocks()));

    assert_err!(workflow.handle_notification("{not json").await);
    assert_err!(workflow.handle_notification(r#"{"detail":{}}"#).await);
    assert_eq!(analysis.submits(), 0);
}

#[derive(Default)]
struct Counting {
    batch_total: AtomicUsize,
    run_starts: AtomicUsize,
    transitions: AtomicUsize,
    completed: AtomicUsize,
    succeeded: AtomicUsize,
}

impl WorkflowProgressCallback for Counting {
    fn on_batch_start(&self, total_runs: usize) {
        self.batch_total.store(total_runs, Ordering::SeqCst);
    }
    fn on_run_start(&self, _run_id: uuid::Uuid, _document: &DocumentReference) {
        self.run_starts.fetch_add(1, Ordering::SeqCst);
    }
    fn on_transition(&self, _run_id: uuid::Uuid, _from: RunState, _to: RunState) {
        self.transitions.fetch_add(1, Ordering::SeqCst);
    }
    fn on_run_complete(&self, _report: &RunReport) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_batch_complete(&self, _total_runs: usize, succeeded: usize) {
        self.succeeded.store(succeeded, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn batch_runs_every_document_and_reports_progress() {
    let counting = Arc::new(Counting::default());
    let config = PipelineConfig::builder()
        .queries(cert_queries())
        .no_identifier_alias()
        .concurrency(2)
        .progress_callback(counting.clone())
        .build()
        .unwrap();
    let (workflow, store, _) = setup(config, ScriptedAnalysisService::succeeding(cert_blocks()));
    for key in ["landing/a.pdf", "landing/b.pdf", "landing/c.pdf"] {
        store.insert(BUCKET, key, "%PDF");
    }
    store.insert(BUCKET, "landing/readme.md", "#");

    let docs = assert_ok!(workflow.scan_landing(BUCKET).await);
    assert_eq!(docs.len(), 4);
    let reports = workflow.run_batch(docs).await;

    assert_eq!(reports.len(), 4);
    assert_eq!(reports.iter().filter(|r| r.is_success()).count(), 3);
    assert_eq!(counting.batch_total.load(Ordering::SeqCst), 4);
    assert_eq!(counting.run_starts.load(Ordering::SeqCst), 4);
    assert_eq!(counting.completed.load(Ordering::SeqCst), 4);
    assert_eq!(counting.succeeded.load(Ordering::SeqCst), 3);
    // 3 transitions per successful run, 1 for the rejected one.
    assert_eq!(counting.transitions.load(Ordering::SeqCst), 10);

    // Without an identifier, outputs are named after the source files.
    let mut outputs = keys_under(&store, "data/");
    outputs.sort();
    assert_eq!(outputs, vec!["data/a.json", "data/b.json", "data/c.json"]);
    assert_eq!(keys_under(&store, "landing/"), vec!["landing/readme.md"]);
}

#[tokio::test]
async fn stream_yields_one_report_per_document() {
    let (workflow, store, _) = setup(cert_config(), ScriptedAnalysisService::succeeding(cert_blocks()));
    store.insert(BUCKET, "landing/one.pdf", "%PDF");
    store.insert(BUCKET, "landing/two.txt", "x");

    let reports: Vec<RunReport> =
        run_stream(Arc::new(workflow), vec![doc("landing/one.pdf"), doc("landing/two.txt")])
            .collect()
            .await;

    assert_eq!(reports.len(), 2);
    let mut states: Vec<RunState> = reports.iter().map(|r| r.state).collect();
    states.sort_by_key(|s| s.to_string());
    assert_eq!(states, vec![RunState::Invalid, RunState::Succeeded]);
}
