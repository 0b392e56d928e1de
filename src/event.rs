//! Inbound "object created" notifications.
//!
//! Three payload shapes are accepted:
//!
//! ```text
//! bus event      {"detail-type": "Object Created",
//!                 "detail": {"bucket": {"name": …}, "object": {"key": …}}}
//! wrapped        {"Payload": <bus event>}
//! storage batch  {"Records": [{"s3": {"bucket": {"name": …}, "object": {"key": …}}}]}
//! ```
//!
//! Keys in the storage batch form are URL-encoded (`+` for space) and are
//! decoded here. Bus events carry the raw key.
//!
//! Parsing only turns a payload into [`DocumentReference`]s; whether a
//! reference starts a run is decided by [`TriggerFilter`].

use crate::config::PipelineConfig;
use crate::error::IngestError;
use crate::model::DocumentReference;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

const OBJECT_CREATED: &str = "Object Created";

#[derive(Debug, Deserialize)]
struct BusEvent {
    #[serde(rename = "detail-type", default)]
    detail_type: Option<String>,
    detail: ObjectDetail,
}

#[derive(Debug, Deserialize)]
struct ObjectDetail {
    bucket: BucketRef,
    object: ObjectRef,
}

#[derive(Debug, Deserialize)]
struct BucketRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ObjectRef {
    key: String,
}

#[derive(Debug, Deserialize)]
struct RecordBatch {
    #[serde(rename = "Records")]
    records: Vec<StorageRecord>,
}

#[derive(Debug, Deserialize)]
struct StorageRecord {
    #[serde(rename = "eventName", default)]
    event_name: Option<String>,
    s3: ObjectDetail,
}

/// Parse a notification from JSON text.
///
/// # Errors
/// [`IngestError::InvalidInput`] when the text is not JSON or matches none
/// of the accepted shapes.
pub fn parse_notification(json: &str) -> Result<Vec<DocumentReference>, IngestError> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| IngestError::invalid_input(format!("notification is not valid JSON: {e}")))?;
    parse_notification_value(&value)
}

/// Parse an already-decoded notification.
///
/// Events of another detail-type (or storage records that are not object
/// creations) yield no references rather than an error.
pub fn parse_notification_value(value: &Value) -> Result<Vec<DocumentReference>, IngestError> {
    let Some(obj) = value.as_object() else {
        return Err(IngestError::invalid_input("notification must be a JSON object"));
    };

    if let Some(inner) = obj.get("Payload") {
        return parse_notification_value(inner);
    }

    if obj.contains_key("Records") {
        let batch: RecordBatch = serde_json::from_value(value.clone())
            .map_err(|e| IngestError::invalid_input(format!("malformed storage notification: {e}")))?;
        return batch
            .records
            .into_iter()
            .filter(|r| {
                r.event_name
                    .as_deref()
                    .is_none_or(|name| name.starts_with("ObjectCreated"))
            })
            .map(|r| {
                let key = decode_key(&r.s3.object.key)?;
                well_formed(DocumentReference::new(r.s3.bucket.name, key))
            })
            .collect();
    }

    if obj.contains_key("detail") {
        let event: BusEvent = serde_json::from_value(value.clone())
            .map_err(|e| IngestError::invalid_input(format!("malformed object event: {e}")))?;
        if let Some(kind) = event.detail_type.as_deref() {
            if kind != OBJECT_CREATED {
                debug!(detail_type = kind, "Ignoring non object-created event");
                return Ok(Vec::new());
            }
        }
        let doc = DocumentReference::new(event.detail.bucket.name, event.detail.object.key);
        return Ok(vec![well_formed(doc)?]);
    }

    Err(IngestError::invalid_input(
        "notification has neither 'detail', 'Records' nor 'Payload'",
    ))
}

fn decode_key(raw: &str) -> Result<String, IngestError> {
    urlencoding::decode(&raw.replace('+', " "))
        .map(|k| k.into_owned())
        .map_err(|e| IngestError::invalid_input(format!("object key '{raw}' is not valid UTF-8: {e}")))
}

fn well_formed(doc: DocumentReference) -> Result<DocumentReference, IngestError> {
    doc.ensure_well_formed()?;
    Ok(doc)
}

/// Decides which notified objects start a run.
///
/// A reference matches when its key lives under `prefix` and, if an
/// extension list is set, its extension is on it. Writes under the archive
/// or results prefixes therefore never re-trigger the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerFilter {
    prefix: String,
    extensions: Option<Vec<String>>,
}

impl TriggerFilter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            extensions: None,
        }
    }

    /// Filter scoped to the config's landing prefix.
    ///
    /// No extension filter is applied, so unsupported files still reach the
    /// validator and end in `Invalid` with a recorded reason.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.landing_prefix.clone())
    }

    /// Only match keys with one of `extensions` (case-insensitive).
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = Some(
            extensions
                .into_iter()
                .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        );
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn matches(&self, document: &DocumentReference) -> bool {
        if !document.key.starts_with(&self.prefix) {
            return false;
        }
        match &self.extensions {
            None => true,
            Some(allowed) => document
                .extension()
                .is_some_and(|ext| allowed.iter().any(|a| a.eq_ignore_ascii_case(ext))),
        }
    }
}
