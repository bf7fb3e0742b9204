//! Remote OCR sidecar provider.

use image::GrayImage;
use serde::Deserialize;
use tracing::info;

use super::{encode_png, TextRecognizer};

/// Sidecar response (private deserialization type).
#[derive(Debug, Deserialize)]
struct OcrResponse {
    text: String,
}

/// Sends the normalized page to `{url}/ocr` as multipart and reads `{"text": ...}`.
pub struct HttpRecognizer {
    url: String,
    client: reqwest::Client,
}

impl HttpRecognizer {
    pub fn new(url: String, client: reqwest::Client) -> Self {
        let url = url.trim_end_matches('/').to_string();
        Self { url, client }
    }
}

#[async_trait::async_trait]
impl TextRecognizer for HttpRecognizer {
    fn name(&self) -> &str {
        "http"
    }

    async fn recognize(&self, image: &GrayImage) -> anyhow::Result<String> {
        use reqwest::multipart::{Form, Part};

        let png = encode_png(image)?;
        info!("HttpRecognizer: posting {} bytes to {}/ocr", png.len(), self.url);

        let part = Part::bytes(png)
            .file_name("page.png")
            .mime_str("image/png")?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/ocr", self.url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OCR sidecar error ({}): {}", status, error_text);
        }

        let body: OcrResponse = response.json().await?;
        Ok(body.text)
    }
}
