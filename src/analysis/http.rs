//! HTTP adapter for an analysis service speaking a small JSON protocol.
//!
//! ```text
//! POST {base}/jobs            {"document": {...}, "feature_types": ["QUERIES"], "queries": [...]}
//!                          →  {"job_id": "..."}
//! GET  {base}/jobs/{id}[?next_token=T]
//!                          →  {"job_status": "IN_PROGRESS" | "SUCCEEDED" | "PARTIAL_SUCCESS" | "FAILED",
//!                              "status_message": "...", "blocks": [...], "next_token": "..."}
//! ```
//!
//! Large results are paginated with `next_token`; [`HttpAnalysisService::poll`]
//! follows the tokens and returns all blocks at once.
//!
//! By default only the document location is sent and the service reads the
//! object itself. [`HttpAnalysisService::with_inline_documents`] makes the
//! adapter fetch the bytes from an [`ObjectStore`] and inline them as base64,
//! for services that cannot reach the bucket.

use super::{AnalysisError, AnalysisService, Block, JobId, JobStatus};
use crate::model::{DocumentReference, FieldQuery};
use crate::storage::ObjectStore;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Guard against a service that hands out tokens forever.
const MAX_RESULT_PAGES: usize = 1000;

/// [`AnalysisService`] over HTTP/JSON.
#[derive(Clone)]
pub struct HttpAnalysisService {
    client: reqwest::Client,
    base_url: String,
    inline_from: Option<Arc<dyn ObjectStore>>,
}

impl std::fmt::Debug for HttpAnalysisService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAnalysisService")
            .field("base_url", &self.base_url)
            .field("inline_documents", &self.inline_from.is_some())
            .finish()
    }
}

impl HttpAnalysisService {
    /// Client for the service at `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, AnalysisError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(AnalysisError::Transport(format!(
                "analysis URL must be http(s), got '{base_url}'"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            inline_from: None,
        })
    }

    /// Send document bytes (read from `store`) with each submission.
    pub fn with_inline_documents(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.inline_from = Some(store);
        self
    }

    async fn fetch_status_page(
        &self,
        job: &JobId,
        next_token: Option<&str>,
    ) -> Result<StatusResponse, AnalysisError> {
        let url = format!("{}/jobs/{}", self.base_url, urlencoding::encode(&job.0));
        let mut request = self.client.get(&url);
        if let Some(token) = next_token {
            request = request.query(&[("next_token", token)]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AnalysisError::UnknownJob(job.0.clone()));
        }
        if !response.status().is_success() {
            return Err(AnalysisError::Transport(format!(
                "HTTP {} polling job '{}'",
                response.status(),
                job
            )));
        }
        response
            .json::<StatusResponse>()
            .await
            .map_err(|e| AnalysisError::MalformedResponse(e.to_string()))
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    document: DocumentLocation<'a>,
    feature_types: [&'static str; 1],
    queries: Vec<QuerySpec<'a>>,
}

#[derive(Debug, Serialize)]
struct DocumentLocation<'a> {
    bucket: &'a str,
    key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_base64: Option<String>,
}

#[derive(Debug, Serialize)]
struct QuerySpec<'a> {
    text: &'a str,
    alias: &'a str,
    pages: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    job_status: String,
    #[serde(default)]
    status_message: Option<String>,
    #[serde(default)]
    blocks: Vec<Block>,
    #[serde(default)]
    next_token: Option<String>,
}

fn build_submit_request<'a>(
    document: &'a DocumentReference,
    queries: &'a [FieldQuery],
    content: Option<&[u8]>,
) -> SubmitRequest<'a> {
    SubmitRequest {
        document: DocumentLocation {
            bucket: &document.bucket,
            key: &document.key,
            content_base64: content.map(|b| base64::engine::general_purpose::STANDARD.encode(b)),
        },
        feature_types: ["QUERIES"],
        queries: queries
            .iter()
            .map(|q| QuerySpec {
                text: &q.text,
                alias: &q.alias,
                pages: q.pages.iter().map(|p| p.to_string()).collect(),
            })
            .collect(),
    }
}

/// Map a status string plus collected blocks onto [`JobStatus`].
fn interpret_status(
    status: &str,
    message: Option<String>,
    blocks: Vec<Block>,
) -> Result<JobStatus, AnalysisError> {
    match status.to_ascii_uppercase().as_str() {
        "PENDING" | "IN_PROGRESS" | "SUBMITTED" => Ok(JobStatus::Pending),
        "SUCCEEDED" => Ok(JobStatus::Succeeded { blocks }),
        "PARTIAL_SUCCESS" => Ok(JobStatus::PartialSuccess {
            blocks,
            message: message.unwrap_or_default(),
        }),
        "FAILED" => Ok(JobStatus::Failed {
            reason: message.unwrap_or_else(|| "no reason given".to_string()),
        }),
        other => Err(AnalysisError::MalformedResponse(format!(
            "unknown job status '{other}'"
        ))),
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisService {
    async fn submit(
        &self,
        document: &DocumentReference,
        queries: &[FieldQuery],
    ) -> Result<JobId, AnalysisError> {
        let content = match &self.inline_from {
            Some(store) => Some(
                store
                    .get(&document.bucket, &document.key)
                    .await
                    .map_err(|e| AnalysisError::SubmitRejected(e.to_string()))?,
            ),
            None => None,
        };
        let body = build_submit_request(document, queries, content.as_deref());

        let response = self
            .client
            .post(format!("{}/jobs", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AnalysisError::SubmitRejected(format!("HTTP {status}: {detail}")));
        }
        if !status.is_success() {
            return Err(AnalysisError::Transport(format!("HTTP {status} submitting job")));
        }

        let parsed: SubmitResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::MalformedResponse(e.to_string()))?;
        debug!(job_id = %parsed.job_id, key = %document.key, "Analysis job submitted");
        Ok(JobId(parsed.job_id))
    }

    async fn poll(&self, job: &JobId) -> Result<JobStatus, AnalysisError> {
        let first = self.fetch_status_page(job, None).await?;
        let mut blocks = first.blocks;
        let mut next_token = first.next_token;

        let status = first.job_status.to_ascii_uppercase();
        let finished_ok = status == "SUCCEEDED" || status == "PARTIAL_SUCCESS";
        let mut pages = 1;
        while finished_ok {
            let Some(token) = next_token.take() else {
                break;
            };
            if pages >= MAX_RESULT_PAGES {
                return Err(AnalysisError::MalformedResponse(format!(
                    "job '{job}' returned more than {MAX_RESULT_PAGES} result pages"
                )));
            }
            let page = self.fetch_status_page(job, Some(&token)).await?;
            blocks.extend(page.blocks);
            next_token = page.next_token;
            pages += 1;
        }

        interpret_status(&first.job_status, first.status_message, blocks)
    }
}
