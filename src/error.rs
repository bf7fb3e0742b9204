//! Error types for the extraction pipeline.
//!
//! Per-document failures ([`PipelineError`]) are folded into that document's
//! outcome by the batch orchestrator. Rule errors are fatal at load time.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single document's unit of work.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Document bytes do not decode to a usable image.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// The recognition engine failed or timed out.
    #[error("text recognition failed: {0}")]
    Recognition(String),

    /// The whole unit exceeded its deadline.
    #[error("document processing timed out after {0:?}")]
    Timeout(Duration),

    /// The unit's task panicked or was aborted.
    #[error("worker failed: {0}")]
    Worker(String),
}

/// A malformed extraction rule or rule set.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RuleError {
    /// Rule name is empty or blank.
    #[error("rule name must not be empty")]
    EmptyName,

    /// Two rules in the same set share a name.
    #[error("duplicate rule name: {0}")]
    DuplicateName(String),

    /// Pattern does not compile.
    #[error("rule '{name}' has an invalid pattern: {reason}")]
    InvalidPattern { name: String, reason: String },

    /// Pattern must contain exactly one capture group.
    #[error("rule '{name}' must have exactly one capture group, found {found}")]
    CaptureGroups { name: String, found: usize },

    /// A rule set must contain at least one rule.
    #[error("rule set '{0}' has no rules")]
    EmptySet(String),
}

/// Rejection of a batch before any document is processed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BatchError {
    /// Two documents in one batch share an identifier.
    #[error("duplicate document identifier in batch: {0}")]
    DuplicateDocument(String),
}
