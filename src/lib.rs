//! Field extraction from scanned document images.
//!
//! This crate provides:
//! - image normalization (grayscale + fixed-threshold binarization)
//! - a swappable text recognition capability (Tesseract CLI, HTTP sidecar)
//! - rule-based field extraction with validated, named rule sets
//! - bounded concurrent batch processing with per-document failure isolation
//! - upload validation, storage and routes for the HTTP service

pub mod batch;
pub mod config;
pub mod error;
pub mod extractor;
pub mod ocr;
pub mod preprocess;
pub mod rules;
pub mod schema;
pub mod server;
pub mod upload;

pub use batch::BatchOrchestrator;
pub use config::{RuleStore, Settings};
pub use error::{BatchError, PipelineError, RuleError};
pub use extractor::extract;
pub use ocr::{RecognitionAdapter, TextRecognizer};
pub use preprocess::{Polarity, Preprocessor};
pub use rules::{ExtractionRule, RuleSet};
pub use schema::{BatchResult, Document, ExtractionOutcome, FieldMap};
