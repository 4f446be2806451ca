//! Eye Aspect Ratio (EAR) from six eye landmarks.
//!
//! EAR = (|p2 - p6| + |p3 - p5|) / (2 * |p1 - p4|), where p1/p4 are the eye
//! corners and p2/p6, p3/p5 are the vertical lid pairs. An open eye sits
//! around 0.3–0.4; a closed eye drops towards zero. The value is scale
//! invariant, so normalized and pixel coordinates give the same result.

use crate::types::{Eye, LandmarkSet, Point};

/// Corner distance below which the eye geometry is considered collapsed.
const MIN_HORIZONTAL_DISTANCE: f32 = 1e-6;

/// Wire value recorded for an eye whose EAR could not be computed.
pub const INVALID_EAR: f32 = -1.0;

/// EAR below which an eye counts as closed.
pub const CLOSED_EAR_THRESHOLD: f32 = 0.25;

/// EAR above which an eye counts as fully open.
pub const OPEN_EAR_THRESHOLD: f32 = 0.37;

/// Compute the EAR of one eye. Returns `None` when the corner points coincide.
pub fn eye_aspect_ratio(eye: &[Point; 6]) -> Option<f32> {
    let horizontal = eye[0].distance(&eye[3]);
    if horizontal < MIN_HORIZONTAL_DISTANCE {
        return None;
    }
    let a = eye[1].distance(&eye[5]);
    let b = eye[2].distance(&eye[4]);
    Some((a + b) / (2.0 * horizontal))
}

/// Per-eye EAR for one face.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EarReading {
    pub left: Option<f32>,
    pub right: Option<f32>,
}

impl EarReading {
    pub fn from_landmarks(landmarks: &LandmarkSet) -> Self {
        let ear_of = |eye| landmarks.eye(eye).as_ref().and_then(eye_aspect_ratio);
        Self {
            left: ear_of(Eye::Left),
            right: ear_of(Eye::Right),
        }
    }

    /// Mean of both eyes; `None` unless both are valid.
    pub fn mean(&self) -> Option<f32> {
        match (self.left, self.right) {
            (Some(l), Some(r)) => Some((l + r) / 2.0),
            _ => None,
        }
    }
}

/// Coarse eye state derived from an EAR value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EyeState {
    Closed,
    Partial,
    Open,
}

impl EyeState {
    pub fn from_ear(ear: f32) -> Self {
        if ear < CLOSED_EAR_THRESHOLD {
            Self::Closed
        } else if ear > OPEN_EAR_THRESHOLD {
            Self::Open
        } else {
            Self::Partial
        }
    }
}

/// Counts completed blinks: a closed reading followed by a fully open one.
///
/// Partial readings neither start nor finish a blink, which keeps a slowly
/// drooping eye from registering.
#[derive(Debug, Clone, Default)]
pub struct BlinkTracker {
    closed: bool,
    blinks: u32,
}

impl BlinkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one EAR sample. Returns true when this sample completes a blink.
    pub fn update(&mut self, ear: f32) -> bool {
        match EyeState::from_ear(ear) {
            EyeState::Closed => {
                self.closed = true;
                false
            }
            EyeState::Open if self.closed => {
                self.closed = false;
                self.blinks += 1;
                true
            }
            _ => false,
        }
    }

    pub fn blinks(&self) -> u32 {
        self.blinks
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
