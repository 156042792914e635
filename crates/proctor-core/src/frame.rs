//! Decoded frames: base64 and image container decoding, brightness statistics.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{GrayImage, RgbImage};

/// A decoded webcam frame.
#[derive(Clone)]
pub struct Frame {
    pub rgb: RgbImage,
    /// Luma plane (width * height bytes), derived from `rgb` at decode time.
    pub gray: GrayImage,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("image_b64 required")]
    MissingPayload,
    #[error("invalid base64 image: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("invalid image: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("image has zero size")]
    EmptyImage,
}

/// Decode a base64 image payload.
///
/// Accepts raw base64 or a data URL (`data:image/jpeg;base64,...`);
/// everything after the last comma is decoded. Whitespace inside the
/// payload is skipped, so line-wrapped base64 decodes too.
pub fn decode_base64_image(payload: &str) -> Result<Vec<u8>, FrameError> {
    let encoded: String = payload
        .rsplit(',')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if encoded.is_empty() {
        return Err(FrameError::MissingPayload);
    }
    Ok(STANDARD.decode(encoded)?)
}

impl Frame {
    pub fn from_rgb(rgb: RgbImage) -> Result<Self, FrameError> {
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyImage);
        }
        let gray = image::DynamicImage::ImageRgb8(rgb.clone()).to_luma8();
        Ok(Self {
            rgb,
            gray,
            width,
            height,
        })
    }

    /// Decode an encoded image (JPEG, PNG, ...) into an RGB frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let img = image::load_from_memory(bytes)?;
        Self::from_rgb(img.to_rgb8())
    }

    pub fn from_base64(payload: &str) -> Result<Self, FrameError> {
        let bytes = decode_base64_image(payload)?;
        Self::from_bytes(&bytes)
    }

    /// Uniform frame of the given color, used for warmup.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self, FrameError> {
        Self::from_rgb(RgbImage::from_pixel(width, height, image::Rgb(rgb)))
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let data = self.gray.as_raw();
        if data.is_empty() {
            return 0.0;
        }
        data.iter().map(|&b| b as f32).sum::<f32>() / data.len() as f32
    }

    /// Population standard deviation of pixel brightness.
    pub fn brightness_stddev(&self) -> f32 {
        let data = self.gray.as_raw();
        if data.is_empty() {
            return 0.0;
        }
        let n = data.len() as f32;
        let mean = self.avg_brightness();
        let variance = data.iter().map(|&b| (b as f32 - mean).powi(2)).sum::<f32>() / n;
        variance.sqrt()
    }

    pub fn is_dark(&self, threshold_pct: f32) -> bool {
        is_dark_frame(self.gray.as_raw(), threshold_pct)
    }
}

/// True if more than `threshold_pct` of pixels fall in the darkest eighth of
/// the range (0–31). Empty input counts as dark.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}
