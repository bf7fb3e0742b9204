//! Pipeline data types: documents in, per-document outcomes out.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Context;
use serde::{Serialize, Serializer};

/// Serialized form of [`ExtractionOutcome::NotRecognizedAsTargetDocument`].
pub const NOT_RECOGNIZED: &str = "Not an Invoice Image";

/// Rule name → extracted value.
pub type FieldMap = BTreeMap<String, String>;

/// A document handed to the pipeline: identifier plus raw image bytes.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            bytes,
        }
    }

    /// Read a document from disk; the identifier is the file name.
    pub async fn from_path(path: &Path) -> anyhow::Result<Self> {
        let id = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("Path has no file name: {:?}", path))?;
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read document: {:?}", path))?;
        Ok(Self { id, bytes })
    }
}

/// Result of running one document through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// At least one rule matched.
    Fields(FieldMap),
    /// Recognition succeeded but no rule matched.
    NotRecognizedAsTargetDocument,
    /// Decoding, recognition or the worker itself failed.
    Failed { reason: String },
}

impl ExtractionOutcome {
    pub fn failed(reason: impl ToString) -> Self {
        Self::Failed {
            reason: reason.to_string(),
        }
    }

    pub fn fields(&self) -> Option<&FieldMap> {
        match self {
            Self::Fields(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

// Field values are always strings, so a failure nests its reason in an
// object to stay distinguishable from a field map with an "error" key.
#[derive(Serialize)]
struct FailureRepr<'a> {
    reason: &'a str,
}

#[derive(Serialize)]
#[serde(untagged)]
enum OutcomeRepr<'a> {
    Fields(&'a FieldMap),
    NotRecognized(&'static str),
    Failed { error: FailureRepr<'a> },
}

impl Serialize for ExtractionOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = match self {
            Self::Fields(map) => OutcomeRepr::Fields(map),
            Self::NotRecognizedAsTargetDocument => OutcomeRepr::NotRecognized(NOT_RECOGNIZED),
            Self::Failed { reason } => OutcomeRepr::Failed {
                error: FailureRepr { reason },
            },
        };
        repr.serialize(serializer)
    }
}

/// Document identifier → outcome, one entry per submitted document.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct BatchResult {
    outcomes: HashMap<String, ExtractionOutcome>,
}

impl BatchResult {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            outcomes: HashMap::with_capacity(capacity),
        }
    }

    pub(crate) fn insert(&mut self, id: String, outcome: ExtractionOutcome) {
        self.outcomes.insert(id, outcome);
    }

    pub fn get(&self, id: &str) -> Option<&ExtractionOutcome> {
        self.outcomes.get(id)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ExtractionOutcome)> {
        self.outcomes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_json_shapes() {
        let mut map = FieldMap::new();
        map.insert("Invoice Number".to_string(), "INV-001".to_string());

        assert_eq!(
            serde_json::to_value(ExtractionOutcome::Fields(map)).unwrap(),
            json!({"Invoice Number": "INV-001"})
        );
        assert_eq!(
            serde_json::to_value(ExtractionOutcome::NotRecognizedAsTargetDocument).unwrap(),
            json!("Not an Invoice Image")
        );
        assert_eq!(
            serde_json::to_value(ExtractionOutcome::failed("invalid image: bad header")).unwrap(),
            json!({"error": {"reason": "invalid image: bad header"}})
        );
    }

    #[test]
    fn test_error_field_differs_from_failure() {
        let mut map = FieldMap::new();
        map.insert("error".to_string(), "E42".to_string());

        let fields = serde_json::to_value(ExtractionOutcome::Fields(map)).unwrap();
        let failed = serde_json::to_value(ExtractionOutcome::failed("E42")).unwrap();
        assert_eq!(fields, json!({"error": "E42"}));
        assert_eq!(failed, json!({"error": {"reason": "E42"}}));
        assert_ne!(fields, failed);
    }

    #[test]
    fn test_batch_result_serializes_as_map() {
        let mut result = BatchResult::default();
        result.insert("a.png".to_string(), ExtractionOutcome::NotRecognizedAsTargetDocument);
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"a.png": "Not an Invoice Image"})
        );
    }

    #[tokio::test]
    async fn test_document_from_path_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        tokio::fs::write(&path, b"bytes").await.unwrap();

        let doc = Document::from_path(&path).await.unwrap();
        assert_eq!(doc.id, "scan.png");
        assert_eq!(doc.bytes, b"bytes");
    }
}
