//! Heuristic spectacle detection from eye-region pixels.
//!
//! Each eye is cropped from the frame using its six mesh landmarks plus a
//! fixed margin, and four cues are scored in `[0, 1]`:
//!
//! - **frame structure**: density of strong Sobel edges (rims and temples),
//! - **lens pattern**: share of specular highlights and dark tint,
//! - **symmetry**: mirrored left/right luminance correlation within the crop,
//! - **bridge**: horizontal discontinuities across the middle band of the
//!   whole frame, where a nose bridge sits.
//!
//! The weighted sum is the detection confidence. No model is involved, so
//! the classifier is cheap but coarse; it is rate limited by
//! [`SpectacleClassifier`] rather than run on every frame.

use std::time::{Duration, Instant};

use image::{imageops, Rgba, RgbaImage};
use serde::Serialize;

use crate::debounce::Debounce;
use crate::types::{Eye, LandmarkSet};

/// Pixels added around the eye landmark bounding box on each side.
pub const EYE_MARGIN_PX: f32 = 30.0;
/// Crops narrower or shorter than this are rejected as degenerate.
pub const MIN_REGION_PX: u32 = 20;

const EDGE_MAGNITUDE_THRESHOLD: f32 = 50.0;
/// Fraction of crop pixels that, as edges, saturates the frame score.
const EDGE_DENSITY_CEILING: f32 = 0.3;
const BRIGHT_THRESHOLD: f32 = 200.0;
const DARK_THRESHOLD: f32 = 50.0;
const BRIDGE_DIFF_THRESHOLD: i16 = 30;

pub const FRAME_WEIGHT: f32 = 0.35;
pub const LENS_WEIGHT: f32 = 0.30;
pub const SYMMETRY_WEIGHT: f32 = 0.20;
pub const BRIDGE_WEIGHT: f32 = 0.15;

/// Confidence strictly above which spectacles are reported.
pub const DETECTION_THRESHOLD: f32 = 0.40;

/// Default minimum spacing between two classifier runs.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SpectacleDetection {
    pub detected: bool,
    pub confidence: f32,
}

/// Individual cue scores, each averaged over both eyes except `bridge`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SpectacleScores {
    pub frame: f32,
    pub lens: f32,
    pub symmetry: f32,
    pub bridge: f32,
}

impl SpectacleScores {
    pub fn confidence(&self) -> f32 {
        self.frame * FRAME_WEIGHT
            + self.lens * LENS_WEIGHT
            + self.symmetry * SYMMETRY_WEIGHT
            + self.bridge * BRIDGE_WEIGHT
    }

    pub fn detection(&self) -> SpectacleDetection {
        let confidence = self.confidence();
        SpectacleDetection {
            detected: confidence > DETECTION_THRESHOLD,
            confidence,
        }
    }
}

/// Crop one eye out of `image`, or `None` if the landmarks are incomplete or
/// the resulting region is degenerate.
pub fn extract_eye_region(image: &RgbaImage, landmarks: &LandmarkSet, eye: Eye) -> Option<RgbaImage> {
    if !landmarks.is_complete() {
        return None;
    }
    let points = landmarks.eye(eye)?;

    let (width, height) = (image.width() as f32, image.height() as f32);
    let (mut min_x, mut max_x) = (f32::INFINITY, f32::NEG_INFINITY);
    let (mut min_y, mut max_y) = (f32::INFINITY, f32::NEG_INFINITY);
    for p in &points {
        min_x = min_x.min(p.x * width);
        max_x = max_x.max(p.x * width);
        min_y = min_y.min(p.y * height);
        max_y = max_y.max(p.y * height);
    }

    let min_x = (min_x - EYE_MARGIN_PX).max(0.0);
    let max_x = (max_x + EYE_MARGIN_PX).min(width);
    let min_y = (min_y - EYE_MARGIN_PX).max(0.0);
    let max_y = (max_y + EYE_MARGIN_PX).min(height);

    let region_w = (max_x - min_x).floor();
    let region_h = (max_y - min_y).floor();
    if region_w < MIN_REGION_PX as f32 || region_h < MIN_REGION_PX as f32 {
        return None;
    }

    let crop = imageops::crop_imm(
        image,
        min_x.floor() as u32,
        min_y.floor() as u32,
        region_w as u32,
        region_h as u32,
    )
    .to_image();
    Some(crop)
}

fn luma(p: &Rgba<u8>) -> u8 {
    (0.3 * p[0] as f32 + 0.59 * p[1] as f32 + 0.11 * p[2] as f32) as u8
}

fn mean_rgb(p: &Rgba<u8>) -> f32 {
    (p[0] as f32 + p[1] as f32 + p[2] as f32) / 3.0
}

fn grayscale(image: &RgbaImage) -> Vec<u8> {
    image.pixels().map(luma).collect()
}

/// Density of strong Sobel edges over interior pixels.
pub fn frame_structure_score(region: &RgbaImage) -> f32 {
    let (w, h) = (region.width() as usize, region.height() as usize);
    if w < 3 || h < 3 {
        return 0.0;
    }
    let gray = grayscale(region);
    let g = |i: usize| gray[i] as f32;

    let mut edges = 0usize;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let i = y * w + x;
            let gx = -g(i - w - 1) + g(i - w + 1) - 2.0 * g(i - 1) + 2.0 * g(i + 1) - g(i + w - 1)
                + g(i + w + 1);
            let gy = g(i - w - 1) + 2.0 * g(i - w) + g(i - w + 1)
                - g(i + w - 1)
                - 2.0 * g(i + w)
                - g(i + w + 1);
            if (gx * gx + gy * gy).sqrt() > EDGE_MAGNITUDE_THRESHOLD {
                edges += 1;
            }
        }
    }

    let ceiling = (w * h) as f32 * EDGE_DENSITY_CEILING;
    (edges as f32 / ceiling).min(1.0)
}

/// Share of very bright and very dark pixels, doubled and capped at 1.
pub fn lens_pattern_score(region: &RgbaImage) -> f32 {
    let total = (region.width() * region.height()) as f32;
    if total == 0.0 {
        return 0.0;
    }

    let (mut bright, mut dark) = (0usize, 0usize);
    for p in region.pixels() {
        let v = mean_rgb(p);
        if v > BRIGHT_THRESHOLD {
            bright += 1;
        }
        if v < DARK_THRESHOLD {
            dark += 1;
        }
    }

    ((bright as f32 / total + dark as f32 / total) * 2.0).min(1.0)
}

/// Zero-mean correlation between each left-half pixel and its mirror, mapped
/// so that an uncorrelated crop scores 0.5.
pub fn symmetry_score(region: &RgbaImage) -> f32 {
    let (w, h) = (region.width(), region.height());
    let half = w / 2;
    if half == 0 || h == 0 {
        return 0.0;
    }

    let pair = |x: u32, y: u32| {
        (
            mean_rgb(region.get_pixel(x, y)) as f64,
            mean_rgb(region.get_pixel(w - 1 - x, y)) as f64,
        )
    };

    let n = (half * h) as f64;
    let (mut left_mean, mut right_mean) = (0.0f64, 0.0f64);
    for y in 0..h {
        for x in 0..half {
            let (l, r) = pair(x, y);
            left_mean += l;
            right_mean += r;
        }
    }
    left_mean /= n;
    right_mean /= n;

    let mut correlation = 0.0f64;
    for y in 0..h {
        for x in 0..half {
            let (l, r) = pair(x, y);
            correlation += (l - left_mean) * (r - right_mean);
        }
    }

    let max_correlation = n * 255.0;
    (correlation / max_correlation + 0.5).clamp(0.0, 1.0) as f32
}

/// Horizontal luminance discontinuities within the middle band (±25% of height).
pub fn bridge_score(image: &RgbaImage) -> f32 {
    let (w, h) = (image.width(), image.height());
    if w < 3 || h == 0 {
        return 0.0;
    }

    let center = h / 2;
    let radius = h / 4;
    let y_start = center.saturating_sub(radius);
    let y_end = (center + radius).min(h - 1);

    let mut lines = 0usize;
    for y in y_start..y_end {
        for x in 1..w - 1 {
            let left = luma(image.get_pixel(x - 1, y)) as i16;
            let right = luma(image.get_pixel(x + 1, y)) as i16;
            if (left - right).abs() > BRIDGE_DIFF_THRESHOLD {
                lines += 1;
            }
        }
    }

    let max_lines = ((w - 2) * (2 * radius + 1)) as f32;
    (lines as f32 / max_lines).min(1.0)
}

/// Score every cue for one face. `None` if either eye region is unusable.
pub fn score(image: &RgbaImage, landmarks: &LandmarkSet) -> Option<SpectacleScores> {
    let left = extract_eye_region(image, landmarks, Eye::Left)?;
    let right = extract_eye_region(image, landmarks, Eye::Right)?;

    let both = |f: fn(&RgbaImage) -> f32| (f(&left) + f(&right)) / 2.0;

    Some(SpectacleScores {
        frame: both(frame_structure_score),
        lens: both(lens_pattern_score),
        symmetry: both(symmetry_score),
        bridge: bridge_score(image),
    })
}

/// Classify one face. Degenerate input yields a not-detected result.
pub fn detect(image: &RgbaImage, landmarks: &LandmarkSet) -> SpectacleDetection {
    match score(image, landmarks) {
        Some(scores) => {
            let detection = scores.detection();
            tracing::trace!(
                frame = scores.frame,
                lens = scores.lens,
                symmetry = scores.symmetry,
                bridge = scores.bridge,
                confidence = detection.confidence,
                "spectacle scores"
            );
            detection
        }
        None => SpectacleDetection::default(),
    }
}

/// Rate-limited wrapper around [`detect`].
#[derive(Debug, Clone)]
pub struct SpectacleClassifier {
    debounce: Debounce,
}

impl SpectacleClassifier {
    pub fn new(interval: Duration) -> Self {
        Self {
            debounce: Debounce::new(interval),
        }
    }

    /// Classify if the debounce window has elapsed; `None` means not evaluated.
    pub fn evaluate(
        &mut self,
        now: Instant,
        image: &RgbaImage,
        landmarks: &LandmarkSet,
    ) -> Option<SpectacleDetection> {
        if !self.debounce.ready(now) {
            return None;
        }
        Some(detect(image, landmarks))
    }

    pub fn reset(&mut self) {
        self.debounce.reset();
    }
}

impl Default for SpectacleClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_CHECK_INTERVAL)
    }
}
