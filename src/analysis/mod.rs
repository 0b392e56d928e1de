//! Document-analysis service abstraction.
//!
//! The extractor talks to any asynchronous analysis backend through
//! [`AnalysisService`]: submit a job for a document and a set of
//! [`FieldQuery`]s, then poll the job until it reaches a terminal status.
//!
//! Results come back as a flat list of [`Block`]s. The blocks that matter
//! are `QUERY` blocks (one per question asked, carrying its alias) and
//! `QUERY_RESULT` blocks (the answer text and confidence). A query points at
//! its answer through an `ANSWER` relationship that lists result-block ids.
//!
//! ```text
//! QUERY {id: q1, query: {alias: cert_number}, relationships: [ANSWER → r1]}
//! QUERY_RESULT {id: r1, text: "AB-123", confidence: 98.0}
//! ```

pub mod http;

pub use http::HttpAnalysisService;

use crate::model::{DocumentReference, FieldQuery};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Analysis-service errors
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The service refused the job (bad document, unsupported format, quota).
    #[error("Analysis job submission rejected: {0}")]
    SubmitRejected(String),

    /// The service does not know the job id.
    #[error("Unknown analysis job '{0}'")]
    UnknownJob(String),

    /// Network or protocol failure talking to the service.
    #[error("Analysis service transport error: {0}")]
    Transport(String),

    /// The service answered with a payload we could not decode.
    #[error("Malformed analysis response: {0}")]
    MalformedResponse(String),
}

/// Opaque job identifier issued by [`AnalysisService::submit`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

/// Status of an analysis job as reported by one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// Still running; poll again later.
    Pending,
    /// Finished; `blocks` holds the full result set.
    Succeeded { blocks: Vec<Block> },
    /// Finished with some pages unprocessed.
    PartialSuccess { blocks: Vec<Block>, message: String },
    /// Finished without a usable result.
    Failed { reason: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

/// Kind of a result block. Anything besides queries and their results is
/// carried as `Other` and ignored by the extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockType {
    Query,
    QueryResult,
    #[serde(other)]
    Other,
}

/// The question a `QUERY` block was created for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockQuery {
    pub text: String,
    #[serde(default)]
    pub alias: Option<String>,
}

/// Typed link from one block to others (`ANSWER` for query → result).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub ids: Vec<String>,
}

/// One node of an analysis result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub block_type: BlockType,
    #[serde(default)]
    pub query: Option<BlockQuery>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl Block {
    /// A `QUERY` block asking `text` under `alias`, answered by `answer_ids`.
    pub fn query(id: &str, alias: &str, text: &str, answer_ids: &[&str]) -> Self {
        let relationships = if answer_ids.is_empty() {
            Vec::new()
        } else {
            vec![Relationship {
                kind: "ANSWER".to_string(),
                ids: answer_ids.iter().map(|s| s.to_string()).collect(),
            }]
        };
        Self {
            id: id.to_string(),
            block_type: BlockType::Query,
            query: Some(BlockQuery {
                text: text.to_string(),
                alias: Some(alias.to_string()),
            }),
            text: None,
            confidence: None,
            page: Some(1),
            relationships,
        }
    }

    /// A `QUERY_RESULT` block with answer text and confidence.
    pub fn query_result(id: &str, text: &str, confidence: f32) -> Self {
        Self {
            id: id.to_string(),
            block_type: BlockType::QueryResult,
            query: None,
            text: Some(text.to_string()),
            confidence: Some(confidence),
            page: Some(1),
            relationships: Vec::new(),
        }
    }
}

/// Asynchronous document-analysis backend.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Start an analysis job for `document` asking exactly `queries`.
    async fn submit(
        &self,
        document: &DocumentReference,
        queries: &[FieldQuery],
    ) -> Result<JobId, AnalysisError>;

    /// Report the current status of `job`.
    async fn poll(&self, job: &JobId) -> Result<JobStatus, AnalysisError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_type_tolerates_unknown_kinds() {
        let b: Block = serde_json::from_str(
            r#"{"id":"x","block_type":"LINE","text":"hello","confidence":99.0}"#,
        )
        .unwrap();
        assert_eq!(b.block_type, BlockType::Other);
    }

    #[test]
    fn query_block_parses_relationships() {
        let b: Block = serde_json::from_str(
            r#"{"id":"q1","block_type":"QUERY",
                "query":{"text":"What is the certificate number?","alias":"cert_number"},
                "relationships":[{"type":"ANSWER","ids":["r1"]}]}"#,
        )
        .unwrap();
        let mut expected =
            Block::query("q1", "cert_number", "What is the certificate number?", &["r1"]);
        expected.page = None;
        assert_eq!(b, expected);
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(JobStatus::Failed { reason: "x".into() }.is_terminal());
        assert!(JobStatus::Succeeded { blocks: vec![] }.is_terminal());
    }
}
