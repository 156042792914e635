//! Aspect-preserving resize onto a square model canvas, and the inverse coordinate mapping.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// Metadata for coordinate de-mapping after letterbox resize.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// Compute scale and centering padding to fit `width × height` inside `size × size`.
    pub fn fit(width: u32, height: u32, size: u32) -> (Self, u32, u32) {
        let scale_w = size as f32 / width as f32;
        let scale_h = size as f32 / height as f32;
        let scale = scale_w.min(scale_h);

        let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);
        let pad_x = (size - new_w) as f32 / 2.0;
        let pad_y = (size - new_h) as f32 / 2.0;

        (Self { scale, pad_x, pad_y }, new_w, new_h)
    }

    /// Map a point from letterboxed model space back to original frame space.
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Resize `img` with bilinear interpolation and paste it centered on a `size × size`
/// canvas filled with `fill`.
pub fn letterbox_rgb(img: &RgbImage, size: u32, fill: [u8; 3]) -> (RgbImage, Letterbox) {
    let (width, height) = img.dimensions();
    let (letterbox, new_w, new_h) = Letterbox::fit(width, height, size);

    let resized = imageops::resize(img, new_w, new_h, FilterType::Triangle);

    let mut canvas = RgbImage::from_pixel(size, size, Rgb(fill));
    imageops::replace(
        &mut canvas,
        &resized,
        letterbox.pad_x.floor() as i64,
        letterbox.pad_y.floor() as i64,
    );

    (canvas, letterbox)
}
