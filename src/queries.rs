//! Built-in field queries for certificate documents.
//!
//! Centralising the default query set here means the questions sent to the
//! analysis service live in exactly one place, and unit tests can inspect
//! them without a running service.
//!
//! Callers override the set via [`crate::config::PipelineConfigBuilder::queries`];
//! these are used only when no override is provided.

use crate::model::FieldQuery;

/// Alias of the certificate-number query. Its answer names the output file.
pub const CERT_NUMBER_ALIAS: &str = "cert_number";

/// The default certificate query set, all scoped to page 1.
pub fn certificate_queries() -> Vec<FieldQuery> {
    vec![
        FieldQuery::new("Until when is this document valid?", "expiry_date"),
        FieldQuery::new("Who is the certification body?", "cert_body"),
        FieldQuery::new("When was this document issued?", "issue_date"),
        FieldQuery::new("What is the certificate number?", CERT_NUMBER_ALIAS),
    ]
}
