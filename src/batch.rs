//! Concurrent per-document batch processing.
//!
//! Each document becomes one unit of work (normalize → recognize → extract)
//! running on its own task. A semaphore shared by every batch caps how many
//! units run at once, whatever the batch size. Each unit returns its own
//! outcome; the orchestrator only merges them after joining.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::PipelineSettings;
use crate::error::{BatchError, PipelineError};
use crate::extractor;
use crate::ocr::{RecognitionAdapter, TextRecognizer};
use crate::preprocess::Preprocessor;
use crate::rules::RuleSet;
use crate::schema::{BatchResult, Document, ExtractionOutcome};

/// Batch pipeline orchestrator.
#[derive(Clone)]
pub struct BatchOrchestrator {
    preprocessor: Preprocessor,
    recognizer: RecognitionAdapter,
    workers: Arc<Semaphore>,
    unit_timeout: Duration,
}

/// Everything a unit needs, owned so the task is `'static`.
#[derive(Clone)]
struct Unit {
    preprocessor: Preprocessor,
    recognizer: RecognitionAdapter,
    rules: Arc<RuleSet>,
    workers: Arc<Semaphore>,
    timeout: Duration,
}

/// Aborts every unit still running when the batch future is dropped.
struct InFlight(Vec<(String, JoinHandle<ExtractionOutcome>)>);

impl Drop for InFlight {
    fn drop(&mut self) {
        for (_, handle) in &self.0 {
            handle.abort();
        }
    }
}

impl BatchOrchestrator {
    pub fn new(
        preprocessor: Preprocessor,
        recognizer: RecognitionAdapter,
        max_workers: usize,
        unit_timeout: Duration,
    ) -> Self {
        Self {
            preprocessor,
            recognizer,
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
            unit_timeout,
        }
    }

    pub fn from_settings(settings: &PipelineSettings, engine: Arc<dyn TextRecognizer>) -> Self {
        let preprocessor = Preprocessor::new()
            .with_threshold(settings.threshold)
            .with_polarity(settings.polarity);
        let recognizer = RecognitionAdapter::new(engine, settings.recognition_timeout);
        Self::new(
            preprocessor,
            recognizer,
            settings.max_workers,
            settings.unit_timeout,
        )
    }

    /// Run every document through the pipeline and wait for all of them.
    ///
    /// Per-document failures are reported as [`ExtractionOutcome::Failed`];
    /// the only batch-level rejection is a duplicated identifier. Dropping
    /// the returned future aborts units that are still in flight.
    pub async fn run_batch(
        &self,
        documents: Vec<Document>,
        rules: Arc<RuleSet>,
    ) -> Result<BatchResult, BatchError> {
        let mut seen = HashSet::with_capacity(documents.len());
        for doc in &documents {
            if !seen.insert(doc.id.as_str()) {
                return Err(BatchError::DuplicateDocument(doc.id.clone()));
            }
        }
        drop(seen);

        let started = Instant::now();
        let total = documents.len();
        info!(
            "Starting batch: {} documents, rule set '{}', engine {}",
            total,
            rules.name(),
            self.recognizer.engine_name()
        );

        let unit = Unit {
            preprocessor: self.preprocessor,
            recognizer: self.recognizer.clone(),
            rules,
            workers: self.workers.clone(),
            timeout: self.unit_timeout,
        };

        let mut in_flight = InFlight(Vec::with_capacity(total));
        for doc in documents {
            let id = doc.id.clone();
            let unit = unit.clone();
            let handle = tokio::spawn(async move { unit.run(doc).await });
            in_flight.0.push((id, handle));
        }

        let mut result = BatchResult::with_capacity(total);
        for (id, handle) in in_flight.0.iter_mut() {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Unit for {} did not complete: {}", id, e);
                    let reason = if e.is_panic() { "panicked" } else { "was cancelled" };
                    ExtractionOutcome::failed(PipelineError::Worker(format!("unit {}", reason)))
                }
            };
            result.insert(id.clone(), outcome);
        }

        let failed = result.iter().filter(|(_, o)| o.is_failed()).count();
        info!(
            "Batch complete: {} documents ({} failed) in {}ms",
            result.len(),
            failed,
            started.elapsed().as_millis()
        );

        Ok(result)
    }
}

impl Unit {
    async fn run(self, doc: Document) -> ExtractionOutcome {
        let permit = match self.workers.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return ExtractionOutcome::failed(PipelineError::Worker(
                    "worker pool closed".to_string(),
                ))
            }
        };

        let id = doc.id.clone();
        let started = Instant::now();

        let outcome = match tokio::time::timeout(self.timeout, self.process(doc, permit)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!("{}: {}", id, e);
                ExtractionOutcome::failed(e)
            }
            Err(_) => {
                warn!("{}: timed out after {:?}", id, self.timeout);
                ExtractionOutcome::failed(PipelineError::Timeout(self.timeout))
            }
        };

        debug!("{}: finished in {}ms", id, started.elapsed().as_millis());
        outcome
    }

    /// The three stages, strictly in order. The image buffer is dropped as
    /// soon as recognition returns.
    async fn process(
        &self,
        doc: Document,
        permit: OwnedSemaphorePermit,
    ) -> Result<ExtractionOutcome, PipelineError> {
        let preprocessor = self.preprocessor;
        let bytes = doc.bytes;
        let (image, _permit) =
            blocking_with_permit(permit, move || preprocessor.process(&bytes)).await?;
        let image = image?;

        let text = self.recognizer.recognize(&image).await?;
        drop(image);

        Ok(extractor::extract(&text, &self.rules))
    }
}

/// Run CPU-bound work on the blocking pool. The permit moves into the job and
/// back out, so work left running after a timeout still counts against the cap.
async fn blocking_with_permit<T, F>(
    permit: OwnedSemaphorePermit,
    work: F,
) -> Result<(T, OwnedSemaphorePermit), PipelineError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || (work(), permit))
        .await
        .map_err(|e| PipelineError::Worker(format!("preprocessing task failed: {}", e)))
}
