//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use edgequake_ingest::{
    AnalysisError, AnalysisService, Block, DocumentReference, FieldQuery, JobId, JobStatus,
    PipelineConfig, PollPolicy,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const BUCKET: &str = "docs";

/// Analysis service that replays a fixed list of poll statuses.
///
/// Each poll pops the next status; the last one repeats forever, so
/// `ScriptedAnalysisService::new(vec![JobStatus::Pending])` never finishes.
pub struct ScriptedAnalysisService {
    script: Mutex<VecDeque<JobStatus>>,
    submits: AtomicUsize,
    polls: AtomicUsize,
    submitted: Mutex<Vec<(DocumentReference, Vec<FieldQuery>)>>,
}

impl ScriptedAnalysisService {
    pub fn new(script: Vec<JobStatus>) -> Self {
        assert!(!script.is_empty(), "script needs at least one status");
        Self {
            script: Mutex::new(script.into()),
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding(blocks: Vec<Block>) -> Self {
        Self::new(vec![JobStatus::Succeeded { blocks }])
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<(DocumentReference, Vec<FieldQuery>)> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisService for ScriptedAnalysisService {
    async fn submit(
        &self,
        document: &DocumentReference,
        queries: &[FieldQuery],
    ) -> Result<JobId, AnalysisError> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        self.submitted
            .lock()
            .unwrap()
            .push((document.clone(), queries.to_vec()));
        Ok(JobId(format!("job-{n}")))
    }

    async fn poll(&self, _job: &JobId) -> Result<JobStatus, AnalysisError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            Ok(script.pop_front().unwrap())
        } else {
            Ok(script.front().cloned().unwrap())
        }
    }
}

/// The two questions of the certificate scenario.
pub fn cert_queries() -> Vec<FieldQuery> {
    vec![
        FieldQuery::new("What is the certificate number?", "cert_no"),
        FieldQuery::new("When does this certificate expire?", "expiration"),
    ]
}

/// Result blocks answering [`cert_queries`]: `AB-123` (98) and `2030-01-01` (91).
pub fn cert_blocks() -> Vec<Block> {
    vec![
        Block::query("q1", "cert_no", "What is the certificate number?", &["r1"]),
        Block::query("q2", "expiration", "When does this certificate expire?", &["r2"]),
        Block::query_result("r1", "AB-123", 98.0),
        Block::query_result("r2", "2030-01-01", 91.0),
    ]
}

/// Fast poll policy: 10ms, 20ms, … capped at 50ms, 1s in total.
pub fn fast_poll() -> PollPolicy {
    PollPolicy {
        increment: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        max_total_wait: Duration::from_secs(1),
    }
}

pub fn cert_config() -> PipelineConfig {
    PipelineConfig::builder()
        .queries(cert_queries())
        .identifier_alias("cert_no")
        .poll(fast_poll())
        .build()
        .unwrap()
}

pub fn doc(key: &str) -> DocumentReference {
    DocumentReference::new(BUCKET, key)
}
