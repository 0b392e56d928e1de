//! Admissibility check for inbound documents.
//!
//! The validator only looks at the [`DocumentReference`] itself: no object
//! reads, no service calls. Policy lives in [`ValidationRule`]s, so new
//! predicates can be added without touching callers; the shipped policy is a
//! single [`ExtensionRule`] admitting `pdf`.

use crate::error::IngestError;
use crate::model::{DocumentReference, ValidationResult};
use std::sync::Arc;
use tracing::debug;

/// One admissibility predicate.
pub trait ValidationRule: Send + Sync {
    /// Short name recorded in [`ValidationResult::rejected_by`].
    fn name(&self) -> &str;

    /// True when the document passes this rule.
    fn check(&self, document: &DocumentReference) -> bool;
}

/// Admit files whose extension is in a case-insensitive allow-list.
#[derive(Debug, Clone)]
pub struct ExtensionRule {
    allowed: Vec<String>,
}

impl ExtensionRule {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn pdf_only() -> Self {
        Self::new(["pdf"])
    }
}

impl ValidationRule for ExtensionRule {
    fn name(&self) -> &str {
        "extension"
    }

    fn check(&self, document: &DocumentReference) -> bool {
        document
            .extension()
            .is_some_and(|ext| self.allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)))
    }
}

/// Runs every rule in order; the first failing rule rejects the document.
#[derive(Clone)]
pub struct Validator {
    rules: Vec<Arc<dyn ValidationRule>>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(vec![Arc::new(ExtensionRule::pdf_only())])
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| r.name()))
            .finish()
    }
}

impl Validator {
    pub fn new(rules: Vec<Arc<dyn ValidationRule>>) -> Self {
        Self { rules }
    }

    /// Validator admitting the given extensions.
    pub fn for_extensions(extensions: &[String]) -> Self {
        Self::new(vec![Arc::new(ExtensionRule::new(extensions.iter().cloned()))])
    }

    pub fn with_rule(mut self, rule: Arc<dyn ValidationRule>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Produce a verdict for `document`.
    ///
    /// # Errors
    /// [`IngestError::InvalidInput`] when the reference is malformed. A
    /// malformed reference is never reported as `valid = false`.
    pub fn validate(&self, document: &DocumentReference) -> Result<ValidationResult, IngestError> {
        document.ensure_well_formed()?;

        let rejected_by = self
            .rules
            .iter()
            .find(|rule| !rule.check(document))
            .map(|rule| rule.name().to_string());

        debug!(
            key = %document.key,
            valid = rejected_by.is_none(),
            rejected_by = rejected_by.as_deref().unwrap_or(""),
            "Validated document"
        );

        Ok(ValidationResult {
            document: document.clone(),
            valid: rejected_by.is_none(),
            rejected_by,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(key: &str) -> DocumentReference {
        DocumentReference::new("docs", key)
    }

    #[test]
    fn pdf_in_any_case_is_valid() {
        let v = Validator::default();
        for key in ["landing/a.pdf", "landing/a.PDF", "landing/a.Pdf", "landing/x.y.pDf"] {
            assert!(v.validate(&doc(key)).unwrap().valid, "{key}");
        }
    }

    #[test]
    fn other_extensions_are_invalid() {
        let v = Validator::default();
        for key in ["landing/a.txt", "landing/a.pdf.txt", "landing/a", "landing/pdf", "landing/a.pdfx"] {
            let result = v.validate(&doc(key)).unwrap();
            assert!(!result.valid, "{key}");
            assert_eq!(result.rejected_by.as_deref(), Some("extension"));
        }
    }

    #[test]
    fn missing_key_is_an_error_not_a_rejection() {
        let err = Validator::default().validate(&doc("")).unwrap_err();
        assert!(matches!(err, IngestError::InvalidInput { .. }));
    }

    #[test]
    fn extra_rules_compose() {
        struct NoDrafts;
        impl ValidationRule for NoDrafts {
            fn name(&self) -> &str {
                "no-drafts"
            }
            fn check(&self, document: &DocumentReference) -> bool {
                !document.file_name().starts_with("draft")
            }
        }

        let v = Validator::default().with_rule(Arc::new(NoDrafts));
        assert!(v.validate(&doc("landing/final.pdf")).unwrap().valid);
        let rejected = v.validate(&doc("landing/draft-1.pdf")).unwrap();
        assert!(!rejected.valid);
        assert_eq!(rejected.rejected_by.as_deref(), Some("no-drafts"));
    }

    #[test]
    fn result_carries_original_reference() {
        let d = doc("landing/a.pdf");
        assert_eq!(Validator::default().validate(&d).unwrap().document, d);
    }
}
