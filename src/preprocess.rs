//! Image normalization ahead of recognition.

use image::{DynamicImage, GenericImageView, GrayImage, Luma};
use tracing::debug;

use crate::error::PipelineError;

/// Default binarization threshold on a 0-255 scale.
pub const DEFAULT_THRESHOLD: u8 = 150;

/// Which side of the threshold becomes white.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polarity {
    /// Pixels above the threshold become black, so dark text is the white foreground.
    #[default]
    Inverted,
    /// Pixels above the threshold become white.
    Normal,
}

impl Polarity {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "inverted" => Some(Self::Inverted),
            "normal" => Some(Self::Normal),
            _ => None,
        }
    }
}

/// Grayscale + fixed-threshold binarization. Stateless apart from its settings.
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    threshold: u8,
    polarity: Polarity,
}

impl Preprocessor {
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            polarity: Polarity::default(),
        }
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_polarity(mut self, polarity: Polarity) -> Self {
        self.polarity = polarity;
        self
    }

    /// Decode raw document bytes.
    pub fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
        if bytes.is_empty() {
            return Err(PipelineError::InvalidImage("empty document".to_string()));
        }
        let image = image::load_from_memory(bytes)
            .map_err(|e| PipelineError::InvalidImage(e.to_string()))?;

        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidImage(format!(
                "image has no pixels ({}x{})",
                width, height
            )));
        }
        Ok(image)
    }

    /// Convert to grayscale and binarize. Output keeps the input dimensions.
    pub fn normalize(&self, image: &DynamicImage) -> GrayImage {
        let (width, height) = image.dimensions();
        debug!(
            "Normalizing {}x{} image (threshold={}, polarity={:?})",
            width, height, self.threshold, self.polarity
        );
        self.binarize(&grayscale(image))
    }

    /// Fixed-threshold binarization of a grayscale image.
    pub fn binarize(&self, gray: &GrayImage) -> GrayImage {
        let (above, below) = match self.polarity {
            Polarity::Inverted => (0u8, 255u8),
            Polarity::Normal => (255u8, 0u8),
        };

        let mut result = gray.clone();
        for pixel in result.pixels_mut() {
            let value = if pixel[0] > self.threshold { above } else { below };
            *pixel = Luma([value]);
        }
        result
    }

    /// Decode then normalize, the first stage of every unit.
    pub fn process(&self, bytes: &[u8]) -> Result<GrayImage, PipelineError> {
        let image = self.decode(bytes)?;
        Ok(self.normalize(&image))
    }
}

/// BT.601 luma in 14-bit fixed point (0.299, 0.587, 0.114), rounded.
/// Alpha is ignored.
pub fn grayscale(image: &DynamicImage) -> GrayImage {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;

    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = (r as u32 * R + g as u32 * G + b as u32 * B + (1 << 13)) >> 14;
        Luma([luma as u8])
    })
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}
