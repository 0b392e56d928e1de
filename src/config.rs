//! Configuration types for the ingestion workflow.
//!
//! All workflow behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. One struct holds every knob so a config can
//! be shared across concurrent runs, logged, and diffed between deployments.

use crate::error::IngestError;
use crate::model::FieldQuery;
use crate::progress::ProgressCallback;
use crate::queries::{certificate_queries, CERT_NUMBER_ALIAS};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Configuration for the validate → extract → archive workflow.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_ingest::{OutputFormat, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .landing_prefix("incoming/")
///     .output_format(OutputFormat::Csv)
///     .max_poll_wait_secs(120)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Prefix under which new uploads appear. Default: `landing/`.
    pub landing_prefix: String,

    /// Prefix documents are moved to after extraction. Default: `archive/`.
    ///
    /// Lifecycle transitions to colder storage classes are configured on the
    /// bucket, not here.
    pub archive_prefix: String,

    /// Prefix extraction records are written under. Default: `data/`.
    pub results_prefix: String,

    /// Bucket for extraction records. `None` writes next to the source
    /// document, in the same bucket.
    pub results_bucket: Option<String>,

    /// Extensions the validator admits, compared case-insensitively.
    /// Default: `["pdf"]`.
    pub accepted_extensions: Vec<String>,

    /// Questions submitted to the analysis service for every document.
    /// Default: [`crate::queries::certificate_queries`].
    pub queries: Vec<FieldQuery>,

    /// Alias whose answer names the output file. Default: `cert_number`.
    ///
    /// When the alias is unanswered (or `None`), the source file stem is
    /// used instead, so a re-run of the same document always lands on the
    /// same path.
    pub identifier_alias: Option<String>,

    /// Serialisation of the persisted extraction record. Default: JSON.
    pub output_format: OutputFormat,

    /// Backoff schedule for polling the analysis job.
    pub poll: PollPolicy,

    /// Accept a `PARTIAL_SUCCESS` job status as a terminal success.
    /// Default: false.
    pub accept_partial: bool,

    /// Number of documents processed at once by batch entry points. Default: 4.
    pub concurrency: usize,

    /// Optional per-run / per-transition progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            landing_prefix: "landing/".to_string(),
            archive_prefix: "archive/".to_string(),
            results_prefix: "data/".to_string(),
            results_bucket: None,
            accepted_extensions: vec!["pdf".to_string()],
            queries: certificate_queries(),
            identifier_alias: Some(CERT_NUMBER_ALIAS.to_string()),
            output_format: OutputFormat::default(),
            poll: PollPolicy::default(),
            accept_partial: false,
            concurrency: 4,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("landing_prefix", &self.landing_prefix)
            .field("archive_prefix", &self.archive_prefix)
            .field("results_prefix", &self.results_prefix)
            .field("results_bucket", &self.results_bucket)
            .field("accepted_extensions", &self.accepted_extensions)
            .field("queries", &self.queries.len())
            .field("identifier_alias", &self.identifier_alias)
            .field("output_format", &self.output_format)
            .field("poll", &self.poll)
            .field("accept_partial", &self.accept_partial)
            .field("concurrency", &self.concurrency)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn WorkflowProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Check the constraints [`PipelineConfigBuilder::build`] enforces.
    ///
    /// Also run by [`Workflow::new`](crate::workflow::Workflow::new) for
    /// configs assembled field by field.
    pub fn validate(&self) -> Result<(), IngestError> {
        let c = self;

        for (name, prefix) in [
            ("landing", &c.landing_prefix),
            ("archive", &c.archive_prefix),
            ("results", &c.results_prefix),
        ] {
            if prefix.is_empty() {
                return Err(IngestError::InvalidConfig(format!(
                    "{name} prefix must not be empty"
                )));
            }
        }
        // Archive and results writes must never look like new uploads.
        for (name, prefix) in [("archive", &c.archive_prefix), ("results", &c.results_prefix)] {
            if prefix.starts_with(&c.landing_prefix) || c.landing_prefix.starts_with(prefix.as_str())
            {
                return Err(IngestError::InvalidConfig(format!(
                    "{name} prefix '{prefix}' overlaps landing prefix '{}'",
                    c.landing_prefix
                )));
            }
        }

        if c.accepted_extensions.is_empty() {
            return Err(IngestError::InvalidConfig(
                "At least one accepted extension is required".into(),
            ));
        }

        validate_queries(&c.queries)?;

        if let Some(alias) = &c.identifier_alias {
            if !c.queries.iter().any(|q| &q.alias == alias) {
                return Err(IngestError::InvalidConfig(format!(
                    "identifier alias '{alias}' does not name a configured query"
                )));
            }
        }

        if c.poll.max_total_wait.is_zero() {
            return Err(IngestError::InvalidConfig(
                "Maximum poll wait must be > 0".into(),
            ));
        }
        if c.poll.increment.is_zero() || c.poll.max_delay.is_zero() {
            return Err(IngestError::InvalidConfig(
                "Poll increment and per-poll ceiling must be > 0".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(IngestError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        Ok(())
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn landing_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.landing_prefix = normalise_prefix(prefix.into());
        self
    }

    pub fn archive_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.archive_prefix = normalise_prefix(prefix.into());
        self
    }

    pub fn results_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.results_prefix = normalise_prefix(prefix.into());
        self
    }

    pub fn results_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.results_bucket = Some(bucket.into());
        self
    }

    pub fn accepted_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.accepted_extensions = extensions
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn queries(mut self, queries: Vec<FieldQuery>) -> Self {
        self.config.queries = queries;
        self
    }

    pub fn identifier_alias(mut self, alias: impl Into<String>) -> Self {
        self.config.identifier_alias = Some(alias.into());
        self
    }

    /// Always name outputs after the source file stem.
    pub fn no_identifier_alias(mut self) -> Self {
        self.config.identifier_alias = None;
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    pub fn poll_increment_ms(mut self, ms: u64) -> Self {
        self.config.poll.increment = Duration::from_millis(ms.max(1));
        self
    }

    pub fn max_poll_delay_ms(mut self, ms: u64) -> Self {
        self.config.poll.max_delay = Duration::from_millis(ms.max(1));
        self
    }

    pub fn max_poll_wait_secs(mut self, secs: u64) -> Self {
        self.config.poll.max_total_wait = Duration::from_secs(secs);
        self
    }

    pub fn poll(mut self, policy: PollPolicy) -> Self {
        self.config.poll = policy;
        self
    }

    pub fn accept_partial(mut self, v: bool) -> Self {
        self.config.accept_partial = v;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, IngestError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Check a query set for the invariants extraction relies on.
pub fn validate_queries(queries: &[FieldQuery]) -> Result<(), IngestError> {
    if queries.is_empty() {
        return Err(IngestError::InvalidConfig(
            "At least one field query is required".into(),
        ));
    }
    let mut seen = HashSet::new();
    for q in queries {
        if q.alias.trim().is_empty() {
            return Err(IngestError::InvalidConfig(format!(
                "query '{}' has an empty alias",
                q.text
            )));
        }
        if q.text.trim().is_empty() {
            return Err(IngestError::InvalidConfig(format!(
                "query '{}' has empty text",
                q.alias
            )));
        }
        if q.pages.is_empty() || q.pages.contains(&0) {
            return Err(IngestError::InvalidConfig(format!(
                "query '{}' must target 1-indexed pages",
                q.alias
            )));
        }
        if !seen.insert(q.alias.as_str()) {
            return Err(IngestError::InvalidConfig(format!(
                "duplicate query alias '{}'",
                q.alias
            )));
        }
    }
    Ok(())
}

fn normalise_prefix(prefix: String) -> String {
    let trimmed = prefix.trim().trim_start_matches('/');
    if trimmed.is_empty() || trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

// ── Poll policy ──────────────────────────────────────────────────────────

/// Linear backoff for polling an analysis job.
///
/// The n-th wait (1-indexed) is `n × increment`, capped at `max_delay`. The
/// sum of all waits never exceeds `max_total_wait`; once it is spent the
/// extractor gives up with [`IngestError::PollTimeout`].
///
/// With the defaults the schedule is 1 s, 2 s, 3 s … 10 s, 10 s, … for at
/// most 5 minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub increment: Duration,
    pub max_delay: Duration,
    pub max_total_wait: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            increment: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_total_wait: Duration::from_secs(300),
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Serialisation of the persisted extraction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `{"source": …, "queries": {alias: {question, answer, confidence}}}` (default)
    #[default]
    Json,
    /// Columns `query_text,alias,answer,confidence`, one row per alias.
    Csv,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Json => "application/json",
            OutputFormat::Csv => "text/csv",
        }
    }
}
