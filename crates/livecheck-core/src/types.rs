use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Number of points in a complete face mesh landmark set.
pub const LANDMARK_COUNT: usize = 468;

/// Face mesh indices of the six left-eye points, in EAR order
/// (outer corner, two upper lid points, inner corner, two lower lid points).
pub const LEFT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];
/// Face mesh indices of the six right-eye points, in EAR order.
pub const RIGHT_EYE: [usize; 6] = [362, 385, 387, 263, 373, 380];

/// A 2D landmark point. Face mesh points are normalized to `[0, 1]` in both axes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "(f32, f32)", into = "(f32, f32)")]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

impl From<Point> for (f32, f32) {
    fn from(p: Point) -> Self {
        (p.x, p.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub fn indices(&self) -> &'static [usize; 6] {
        match self {
            Self::Left => &LEFT_EYE,
            Self::Right => &RIGHT_EYE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// Ordered landmark points for one detected face.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LandmarkSet(pub Vec<Point>);

impl LandmarkSet {
    pub fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every face mesh point is present.
    pub fn is_complete(&self) -> bool {
        self.0.len() >= LANDMARK_COUNT
    }

    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// The six EAR-ordered points of one eye, or `None` if any index is missing.
    pub fn eye(&self, eye: Eye) -> Option<[Point; 6]> {
        let idx = eye.indices();
        let mut out = [Point::default(); 6];
        for (slot, &i) in out.iter_mut().zip(idx.iter()) {
            *slot = *self.0.get(i)?;
        }
        Some(out)
    }
}

/// One decoded video frame as delivered by the frame source.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbaImage,
    /// Capture time in milliseconds since the Unix epoch.
    pub captured_at_ms: i64,
}

impl Frame {
    pub fn new(image: RgbaImage, captured_at_ms: i64) -> Self {
        Self {
            image,
            captured_at_ms,
        }
    }

    /// Wrap an image stamped with the current wall-clock time.
    pub fn now(image: RgbaImage) -> Self {
        Self::new(image, chrono::Utc::now().timestamp_millis())
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
