//! Rule-based field extraction from recognized text.
//!
//! Pure functions, no async. Each rule is applied to the untouched source
//! text, so rules may overlap freely and their order never changes the result.

use tracing::debug;

use crate::rules::RuleSet;
use crate::schema::{ExtractionOutcome, FieldMap};

/// Apply every rule in `rules` to `raw_text`.
///
/// Returns [`ExtractionOutcome::NotRecognizedAsTargetDocument`] when no rule
/// matches; a single matching rule is enough for a field map, even if its
/// capture cleans down to an empty string.
pub fn extract(raw_text: &str, rules: &RuleSet) -> ExtractionOutcome {
    let mut fields = FieldMap::new();

    for rule in rules.rules() {
        if let Some(raw) = rule.capture(raw_text) {
            fields.insert(rule.name().to_string(), clean_text(raw));
        }
    }

    debug!(
        "Rule set '{}': {} of {} rules matched",
        rules.name(),
        fields.len(),
        rules.len()
    );

    if fields.is_empty() {
        ExtractionOutcome::NotRecognizedAsTargetDocument
    } else {
        ExtractionOutcome::Fields(fields)
    }
}

/// Collapse runs of whitespace (including line breaks) to one space and trim.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
