//! Text recognition capability.
//!
//! Defines the [`TextRecognizer`] trait so OCR backends (local Tesseract,
//! remote sidecar, test stubs) can be swapped, and the [`RecognitionAdapter`]
//! that turns backend failures into per-document [`PipelineError`]s.

pub mod remote;
pub mod tesseract;

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, GrayImage, ImageFormat};
use tracing::{debug, warn};

use crate::config::OcrSettings;
use crate::error::PipelineError;

pub use remote::HttpRecognizer;
pub use tesseract::TesseractRecognizer;

/// Async trait implemented by each OCR backend.
#[async_trait::async_trait]
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &str;
    async fn recognize(&self, image: &GrayImage) -> anyhow::Result<String>;
}

/// Known backend identifiers used for selection from settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcrBackendKind {
    Tesseract,
    Http,
}

impl OcrBackendKind {
    /// Parse a settings string into a backend kind.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "tesseract" => Some(Self::Tesseract),
            "http" => Some(Self::Http),
            _ => None,
        }
    }
}

/// Build the configured backend.
pub fn create_recognizer(settings: &OcrSettings) -> anyhow::Result<Arc<dyn TextRecognizer>> {
    let recognizer: Arc<dyn TextRecognizer> = match settings.backend {
        OcrBackendKind::Tesseract => Arc::new(TesseractRecognizer::new(
            settings.tesseract_bin.clone(),
            settings.language.clone(),
            settings.page_seg_mode,
        )),
        OcrBackendKind::Http => {
            let url = settings
                .http_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("OCR_HTTP_URL must be set for the http backend"))?;
            Arc::new(HttpRecognizer::new(url, reqwest::Client::new()))
        }
    };
    Ok(recognizer)
}

/// Typed wrapper around a recognizer with a per-call deadline. No retries.
#[derive(Clone)]
pub struct RecognitionAdapter {
    engine: Arc<dyn TextRecognizer>,
    timeout: Duration,
}

impl RecognitionAdapter {
    pub fn new(engine: Arc<dyn TextRecognizer>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub async fn recognize(&self, image: &GrayImage) -> Result<String, PipelineError> {
        match tokio::time::timeout(self.timeout, self.engine.recognize(image)).await {
            Ok(Ok(text)) => {
                debug!("{}: recognized {} chars", self.engine.name(), text.len());
                Ok(text)
            }
            Ok(Err(e)) => {
                warn!("{}: recognition failed: {:#}", self.engine.name(), e);
                Err(PipelineError::Recognition(format!("{:#}", e)))
            }
            Err(_) => Err(PipelineError::Recognition(format!(
                "{} timed out after {:?}",
                self.engine.name(),
                self.timeout
            ))),
        }
    }
}

/// Encode a normalized image as PNG for backends that take files.
pub(crate) fn encode_png(image: &GrayImage) -> anyhow::Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(image.clone()).write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}
