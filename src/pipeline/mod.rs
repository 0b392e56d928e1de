//! Pipeline stages for document ingestion.
//!
//! Each submodule implements exactly one step of a run, and each step is a
//! function of its input plus calls to the collaborators it is handed. The
//! controller in [`crate::workflow`] sequences them.
//!
//! ## Data Flow
//!
//! ```text
//! validate ──▶ extract ──────────────────────────▶ archive
//! (rules)      submit ▶ poll ▶ blocks ▶ persist    (copy ▶ verify ▶ delete)
//! ```
//!
//! 1. [`validate`]: admissibility verdict from the reference alone
//! 2. [`poll`]: bounded linear backoff schedule for the job poll loop
//! 3. [`blocks`]: match query blocks to their answers
//! 4. [`persist`]: render the record as JSON/CSV and pick its output key
//! 5. [`extract`]: drive submit → poll → parse → persist
//! 6. [`archive`]: move the source to the archive prefix without ever
//!    losing it

pub mod archive;
pub mod blocks;
pub mod extract;
pub mod persist;
pub mod poll;
pub mod validate;
