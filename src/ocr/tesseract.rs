//! Local Tesseract OCR via its command-line interface.

use std::process::Stdio;

use anyhow::Context;
use image::GrayImage;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{encode_png, TextRecognizer};

/// Pipes a PNG into `tesseract stdin stdout` and reads the text back.
///
/// The child is killed if the recognition future is dropped, so an aborted
/// batch leaves no stray processes.
pub struct TesseractRecognizer {
    binary: String,
    language: String,
    page_seg_mode: u8,
}

impl TesseractRecognizer {
    pub fn new(binary: String, language: String, page_seg_mode: u8) -> Self {
        Self {
            binary,
            language,
            page_seg_mode,
        }
    }

    fn args(&self) -> Vec<String> {
        vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "-l".to_string(),
            self.language.clone(),
            "--psm".to_string(),
            self.page_seg_mode.to_string(),
        ]
    }
}

#[async_trait::async_trait]
impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, image: &GrayImage) -> anyhow::Result<String> {
        let png = encode_png(image)?;
        debug!(
            "TesseractRecognizer: {} bytes of PNG to {} (lang={}, psm={})",
            png.len(),
            self.binary,
            self.language,
            self.page_seg_mode
        );

        let mut child = Command::new(&self.binary)
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.binary))?;

        // tesseract reads the whole image before writing anything
        let mut stdin = child.stdin.take().context("tesseract stdin unavailable")?;
        stdin
            .write_all(&png)
            .await
            .context("Failed to send image to tesseract")?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for tesseract")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("tesseract exited with {}: {}", output.status, stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
