//! Frame sources feeding the ingest pipeline.
//!
//! Landmark detection happens upstream; a source yields each frame together
//! with the face meshes already found in it.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use livecheck_core::{Frame, LandmarkSet};
use serde::Deserialize;
use thiserror::Error;

pub const MANIFEST_FILE: &str = "manifest.jsonl";

/// Gap inserted between the last frame of a loop and the first of the next.
const LOOP_GAP: Duration = Duration::from_millis(33);

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("frame source unavailable at {path}: {source}")]
    Unavailable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("manifest line {line}: {source}")]
    Manifest {
        line: usize,
        source: serde_json::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("recording at {0} has no frames")]
    Empty(PathBuf),
}

/// One frame with its detected faces, `offset` from the start of the recording.
#[derive(Debug, Clone)]
pub struct SourceFrame {
    pub frame: Frame,
    pub faces: Vec<LandmarkSet>,
    pub offset: Duration,
}

pub trait FrameSource: Send {
    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<SourceFrame>, SourceError>;
}

#[derive(Debug, Clone, Deserialize)]
struct ManifestEntry {
    image: PathBuf,
    offset_ms: u64,
    #[serde(default)]
    faces: Vec<LandmarkSet>,
}

/// Replays a recorded directory: `manifest.jsonl` plus the image files it names.
pub struct ReplaySource {
    dir: PathBuf,
    entries: Vec<ManifestEntry>,
    cursor: usize,
    looping: bool,
    cycle_base: Duration,
}

impl ReplaySource {
    pub fn open(dir: impl AsRef<Path>, looping: bool) -> Result<Self, SourceError> {
        let dir = dir.as_ref().to_path_buf();
        let manifest = dir.join(MANIFEST_FILE);
        let text = fs::read_to_string(&manifest).map_err(|source| SourceError::Unavailable {
            path: manifest.clone(),
            source,
        })?;

        let mut entries = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: ManifestEntry = serde_json::from_str(line)
                .map_err(|source| SourceError::Manifest { line: i + 1, source })?;
            entries.push(entry);
        }
        if entries.is_empty() {
            return Err(SourceError::Empty(dir));
        }

        tracing::info!(dir = %dir.display(), frames = entries.len(), looping, "recording opened");
        Ok(Self {
            dir,
            entries,
            cursor: 0,
            looping,
            cycle_base: Duration::ZERO,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> Result<Option<SourceFrame>, SourceError> {
        if self.cursor == self.entries.len() {
            if !self.looping {
                return Ok(None);
            }
            let last = self.entries.last().map(|e| e.offset_ms).unwrap_or(0);
            self.cycle_base += Duration::from_millis(last) + LOOP_GAP;
            self.cursor = 0;
        }
        let entry = &self.entries[self.cursor];
        self.cursor += 1;

        let path = self.dir.join(&entry.image);
        let image = image::open(&path)
            .map_err(|source| SourceError::Decode {
                path: path.clone(),
                source,
            })?
            .to_rgba8();

        Ok(Some(SourceFrame {
            frame: Frame::now(image),
            faces: entry.faces.clone(),
            offset: self.cycle_base + Duration::from_millis(entry.offset_ms),
        }))
    }
}
