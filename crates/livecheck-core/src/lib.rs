//! livecheck-core: per-frame analysis for liveness capture.
//!
//! Everything in this crate is synchronous and free of I/O: landmark geometry,
//! pixel-level spectacle heuristics, brightness sampling and the bounded
//! buffers that hold captured data until a session completes.

pub mod brightness;
pub mod buffer;
pub mod debounce;
pub mod ear;
pub mod spectacles;
pub mod types;

pub use buffer::BoundedBuffer;
pub use debounce::Debounce;
pub use ear::{BlinkTracker, EarReading, EyeState};
pub use spectacles::{SpectacleClassifier, SpectacleDetection, SpectacleScores};
pub use types::{Eye, Frame, LandmarkSet, Point};
