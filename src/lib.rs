//! # edgequake-ingest
//!
//! Document-ingestion workflow: validate an uploaded file, extract structured
//! fields with a document-analysis service, and archive the source.
//!
//! ## Why this crate?
//!
//! Upload-triggered pipelines are usually wired together from hosted
//! functions and a managed state machine, which makes branching, failure
//! handling and retries hard to test. Here the same workflow is an explicit
//! finite-state machine driven by a controller loop. Every stage has a typed
//! contract and every failure lands in a named terminal state. Storage and
//! analysis are traits, so the whole workflow runs in memory under test.
//!
//! ## Pipeline Overview
//!
//! ```text
//! object created (landing/…)
//!  │
//!  ├─ 1. Trigger   parse notification, keep keys under the landing prefix
//!  ├─ 2. Validate  admissibility rules (default: extension is pdf)      ─▶ Invalid
//!  ├─ 3. Extract   submit queries, poll with linear backoff, match
//!  │               answers, write record to data/                     ─▶ ExtractionFailed
//!  ├─ 4. Archive   copy → verify → delete into archive/                ─▶ ArchivalFailed
//!  └─ 5. Report    RunReport per document                             ─▶ Succeeded
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_ingest::{HttpAnalysisService, LocalObjectStore, PipelineConfig, Workflow};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(LocalObjectStore::new("./buckets").await?);
//!     let analysis = Arc::new(HttpAnalysisService::new("http://localhost:8080", 30)?);
//!     let workflow = Workflow::new(PipelineConfig::default(), store, analysis)?;
//!
//!     let event = std::fs::read_to_string("event.json")?;
//!     for report in workflow.handle_notification(&event).await? {
//!         println!("{} → {}", report.document, report.state);
//!         if let Some(reason) = &report.failure {
//!             eprintln!("  {reason}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ingest` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-ingest = { version = "0.1", default-features = false }
//! ```
//!
//! ## Failure Semantics
//!
//! | Terminal state | Cause | Where the document is |
//! |----------------|-------|-----------------------|
//! | `Invalid` | rejected by a rule, or malformed reference | landing |
//! | `ExtractionFailed` | job failed, poll timeout, unknown alias, missing required field | landing |
//! | `ArchivalFailed` | copy, verify or delete failed | landing, or archive when the source's state is unknown |
//! | `Succeeded` | all stages done | archive |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analysis;
pub mod config;
pub mod error;
pub mod event;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod queries;
pub mod storage;
pub mod stream;
pub mod workflow;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analysis::{AnalysisError, AnalysisService, Block, BlockType, HttpAnalysisService, JobId, JobStatus};
pub use config::{OutputFormat, PipelineConfig, PipelineConfigBuilder, PollPolicy};
pub use error::{FailureReason, IngestError};
pub use event::{parse_notification, TriggerFilter};
pub use model::{DocumentReference, ExtractedField, ExtractionRecord, FieldQuery, ValidationResult};
pub use output::{BatchStats, RunReport, Transition};
pub use pipeline::validate::{ExtensionRule, ValidationRule, Validator};
pub use progress::{NoopProgressCallback, ProgressCallback, WorkflowProgressCallback};
pub use queries::certificate_queries;
pub use storage::{InMemoryObjectStore, LocalObjectStore, ObjectStore, StorageError};
pub use stream::{run_stream, RunStream};
pub use workflow::{RunState, StepOutcome, Workflow, WorkflowRun};
