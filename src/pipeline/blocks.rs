//! Turn analysis result blocks into an [`ExtractionRecord`].
//!
//! Matching is explicit: a `QUERY` block names its answer(s) by block id in
//! an `ANSWER` relationship, and only those `QUERY_RESULT` blocks count. No
//! positional or textual guessing.
//!
//! Rules:
//! - every submitted query gets exactly one entry, answered or not;
//! - a query block whose alias was never submitted is a contract violation
//!   ([`IngestError::UnknownQueryAlias`]);
//! - when several candidates answer the same alias (several answer ids, or
//!   the same query asked on several pages) the highest confidence wins, and
//!   ties keep the first one seen;
//! - confidences are clamped into `[0, 100]`; missing or non-finite → 0.

use crate::analysis::{Block, BlockType};
use crate::error::IngestError;
use crate::model::{ExtractedField, ExtractionRecord, FieldQuery};
use std::collections::HashMap;
use tracing::warn;

const ANSWER_RELATIONSHIP: &str = "ANSWER";

/// Build the record for `queries` from the blocks of a finished job.
pub fn match_answers(
    blocks: &[Block],
    queries: &[FieldQuery],
) -> Result<ExtractionRecord, IngestError> {
    let submitted: HashMap<&str, &FieldQuery> =
        queries.iter().map(|q| (q.alias.as_str(), q)).collect();

    let results: HashMap<&str, &Block> = blocks
        .iter()
        .filter(|b| b.block_type == BlockType::QueryResult)
        .map(|b| (b.id.as_str(), b))
        .collect();

    let mut record = ExtractionRecord::new();
    for query in queries {
        record.insert(ExtractedField::unanswered(query));
    }

    for block in blocks.iter().filter(|b| b.block_type == BlockType::Query) {
        let query = resolve_query(block, queries, &submitted)?;

        let best = answer_ids(block)
            .filter_map(|id| match results.get(id) {
                Some(result) => Some(*result),
                None => {
                    warn!(query_block = %block.id, answer_id = %id, "Answer id has no result block");
                    None
                }
            })
            .filter_map(|result| to_field(query, result))
            .fold(None::<ExtractedField>, |best, candidate| match best {
                Some(b) if b.confidence >= candidate.confidence => Some(b),
                _ => Some(candidate),
            });

        if let Some(candidate) = best {
            let replace = match record.get(&query.alias) {
                Some(existing) => {
                    !existing.is_answered() || candidate.confidence > existing.confidence
                }
                None => true,
            };
            if replace {
                record.insert(candidate);
            }
        }
    }

    Ok(record)
}

/// Find the submitted query a `QUERY` block belongs to.
///
/// Blocks normally carry the alias we sent; when a service drops it, fall
/// back to matching the question text exactly.
fn resolve_query<'q>(
    block: &Block,
    queries: &'q [FieldQuery],
    submitted: &HashMap<&str, &'q FieldQuery>,
) -> Result<&'q FieldQuery, IngestError> {
    let info = block.query.as_ref();
    match info.and_then(|q| q.alias.as_deref()) {
        Some(alias) => submitted
            .get(alias)
            .copied()
            .ok_or_else(|| IngestError::UnknownQueryAlias {
                alias: alias.to_string(),
            }),
        None => {
            let text = info.map(|q| q.text.as_str()).unwrap_or("");
            queries
                .iter()
                .find(|q| q.text == text)
                .ok_or_else(|| IngestError::UnknownQueryAlias {
                    alias: format!("<no alias: '{text}'>"),
                })
        }
    }
}

fn answer_ids(block: &Block) -> impl Iterator<Item = &str> {
    block
        .relationships
        .iter()
        .filter(|r| r.kind.is_empty() || r.kind.eq_ignore_ascii_case(ANSWER_RELATIONSHIP))
        .flat_map(|r| r.ids.iter().map(String::as_str))
}

fn to_field(query: &FieldQuery, result: &Block) -> Option<ExtractedField> {
    let answer = result.text.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
    Some(ExtractedField {
        alias: query.alias.clone(),
        question: query.text.clone(),
        answer: Some(answer.to_string()),
        confidence: clamp_confidence(result.confidence),
    })
}

fn clamp_confidence(confidence: Option<f32>) -> f32 {
    match confidence {
        Some(c) if c.is_finite() => c.clamp(0.0, 100.0),
        _ => 0.0,
    }
}
