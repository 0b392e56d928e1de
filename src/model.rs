//! Core data model shared by every pipeline stage.
//!
//! All types here are plain values: they are created once by the stage that
//! owns them and never mutated afterwards. A [`DocumentReference`] threads
//! through the whole run; each stage adds its own result type on top.

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Physical location of an uploaded document: `{bucket, key}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentReference {
    pub bucket: String,
    pub key: String,
}

impl DocumentReference {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Reject references that cannot name an object.
    ///
    /// A missing bucket, a missing key, a key that ends in `/` (a
    /// "directory" with no file name) and a key with empty or `.`/`..`
    /// segments are all input errors.
    pub fn ensure_well_formed(&self) -> Result<(), IngestError> {
        if self.bucket.trim().is_empty() {
            return Err(IngestError::invalid_input(format!(
                "document reference for key '{}' has no bucket",
                self.key
            )));
        }
        if self.key.trim().is_empty() {
            return Err(IngestError::invalid_input(format!(
                "document reference in bucket '{}' has no object key",
                self.bucket
            )));
        }
        if self.file_name().is_empty() {
            return Err(IngestError::invalid_input(format!(
                "object key '{}' has no file name",
                self.key
            )));
        }
        if self
            .key
            .split('/')
            .any(|s| s.is_empty() || s == "." || s == "..")
        {
            return Err(IngestError::invalid_input(format!(
                "object key '{}' has empty or relative path segments",
                self.key
            )));
        }
        Ok(())
    }

    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or("")
    }

    /// Extension of the file name (text after the last `.`), if any.
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => None,
            Some(i) => Some(&name[i + 1..]),
        }
    }

    /// File name without its extension.
    pub fn file_stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => name,
            Some(i) => &name[..i],
        }
    }

    /// Same bucket, different key.
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self {
            bucket: self.bucket.clone(),
            key: key.into(),
        }
    }
}

impl fmt::Display for DocumentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Validator verdict for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub document: DocumentReference,
    pub valid: bool,
    /// Name of the first rule that rejected the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<String>,
}

/// A named question posed to the analysis service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldQuery {
    /// Natural-language question, e.g. "What is the certificate number?".
    pub text: String,
    /// Stable key for the answer in the extraction record.
    pub alias: String,
    /// 1-indexed pages the question is scoped to.
    #[serde(default = "default_pages")]
    pub pages: Vec<u32>,
    /// Extraction fails when a required query has no answer.
    #[serde(default)]
    pub required: bool,
}

fn default_pages() -> Vec<u32> {
    vec![1]
}

impl FieldQuery {
    pub fn new(text: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            alias: alias.into(),
            pages: default_pages(),
            required: false,
        }
    }

    pub fn pages(mut self, pages: impl Into<Vec<u32>>) -> Self {
        self.pages = pages.into();
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }
}

/// One answered (or unanswered) query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    pub alias: String,
    pub question: String,
    /// `None` when the service found no answer for the query.
    pub answer: Option<String>,
    /// Service confidence in `[0, 100]`; 0 when unanswered.
    pub confidence: f32,
}

impl ExtractedField {
    /// Placeholder for a submitted query the service did not answer.
    pub fn unanswered(query: &FieldQuery) -> Self {
        Self {
            alias: query.alias.clone(),
            question: query.text.clone(),
            answer: None,
            confidence: 0.0,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.answer.as_deref().is_some_and(|a| !a.trim().is_empty())
    }
}

/// Extracted fields keyed by alias.
///
/// Backed by a `BTreeMap` so iteration (and therefore every serialised
/// artifact) is ordered by alias.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    fields: BTreeMap<String, ExtractedField>,
}

impl ExtractionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, replacing any existing entry with the same alias.
    pub fn insert(&mut self, field: ExtractedField) {
        self.fields.insert(field.alias.clone(), field);
    }

    pub fn get(&self, alias: &str) -> Option<&ExtractedField> {
        self.fields.get(alias)
    }

    /// Answer text for `alias`, if the field was answered.
    pub fn answer(&self, alias: &str) -> Option<&str> {
        self.fields
            .get(alias)
            .filter(|f| f.is_answered())
            .and_then(|f| f.answer.as_deref())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in alias order.
    pub fn fields(&self) -> impl Iterator<Item = &ExtractedField> {
        self.fields.values()
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}
