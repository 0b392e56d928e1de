//! Serialise extraction records and choose where they are written.
//!
//! Output must be byte-identical across re-runs of the same document, so
//! rendering depends only on the record and the source reference: fields are
//! emitted in alias order and nothing time- or run-dependent is included.

use crate::config::OutputFormat;
use crate::error::IngestError;
use crate::model::{DocumentReference, ExtractionRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

/// Longest identifier kept in an output key.
const MAX_NAME_LEN: usize = 128;

/// Runs of characters that are unsafe or awkward in object keys.
static UNSAFE_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid regex"));

#[derive(Serialize)]
struct JsonRecord<'a> {
    source: &'a DocumentReference,
    queries: BTreeMap<&'a str, JsonField<'a>>,
}

#[derive(Serialize)]
struct JsonField<'a> {
    question: &'a str,
    answer: Option<&'a str>,
    confidence: f32,
}

/// Render `record` in `format`.
pub fn render(
    record: &ExtractionRecord,
    source: &DocumentReference,
    format: OutputFormat,
) -> Result<Vec<u8>, IngestError> {
    match format {
        OutputFormat::Json => render_json(record, source),
        OutputFormat::Csv => Ok(render_csv(record).into_bytes()),
    }
}

fn render_json(
    record: &ExtractionRecord,
    source: &DocumentReference,
) -> Result<Vec<u8>, IngestError> {
    let doc = JsonRecord {
        source,
        queries: record
            .fields()
            .map(|f| {
                (
                    f.alias.as_str(),
                    JsonField {
                        question: &f.question,
                        answer: f.answer.as_deref(),
                        confidence: f.confidence,
                    },
                )
            })
            .collect(),
    };
    let mut bytes = serde_json::to_vec_pretty(&doc)?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn render_csv(record: &ExtractionRecord) -> String {
    let mut out = String::from("query_text,alias,answer,confidence\n");
    for f in record.fields() {
        let row = [
            csv_field(&f.question),
            csv_field(&f.alias),
            csv_field(f.answer.as_deref().unwrap_or("")),
            f.confidence.to_string(),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

/// Quote a CSV field when it contains a delimiter, quote, or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Reduce free text to a safe object-key segment, or `None` if nothing
/// usable is left.
pub fn sanitise_name(raw: &str) -> Option<String> {
    let replaced = UNSAFE_NAME_CHARS.replace_all(raw.trim(), "_");
    let trimmed = replaced.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        return None;
    }
    let mut name: String = trimmed.chars().take(MAX_NAME_LEN).collect();
    while name.ends_with(['_', '.']) {
        name.pop();
    }
    Some(name)
}

/// Output key for a record: `{prefix}{name}.{ext}`.
///
/// `name` is the sanitised answer of `identifier_alias` when answered, else
/// the sanitised source file stem, else `document`.
pub fn output_key(
    prefix: &str,
    record: &ExtractionRecord,
    identifier_alias: Option<&str>,
    source: &DocumentReference,
    format: OutputFormat,
) -> String {
    let name = identifier_alias
        .and_then(|alias| record.answer(alias))
        .and_then(sanitise_name)
        .or_else(|| sanitise_name(source.file_stem()))
        .unwrap_or_else(|| "document".to_string());
    format!("{prefix}{name}.{}", format.extension())
}
