//! Ambient brightness from a down-sampled frame.

use image::{imageops, RgbaImage};

/// Mean luminance (0–255) above which the scene is considered too bright.
pub const DEFAULT_BRIGHTNESS_THRESHOLD: f32 = 200.0;

const SAMPLE_WIDTH: u32 = 64;
const SAMPLE_HEIGHT: u32 = 48;

/// Mean Rec.601 luminance over a small thumbnail of `image`.
///
/// Returns `None` for an empty image.
pub fn mean_luminance(image: &RgbaImage) -> Option<f32> {
    if image.width() == 0 || image.height() == 0 {
        return None;
    }

    let sample = imageops::thumbnail(
        image,
        SAMPLE_WIDTH.min(image.width()),
        SAMPLE_HEIGHT.min(image.height()),
    );

    let count = (sample.width() * sample.height()) as f64;
    let sum: f64 = sample
        .pixels()
        .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
        .sum();

    Some((sum / count) as f32)
}
