use std::collections::BTreeSet;

use serde::Serialize;

/// A condition that holds the session timer while it persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PauseReason {
    NoFace,
    MultipleFaces,
    Spectacles,
    TooBright,
}

impl PauseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoFace => "no-face",
            Self::MultipleFaces => "multiple-faces",
            Self::Spectacles => "spectacles",
            Self::TooBright => "too-bright",
        }
    }

    /// Text shown to the user while this reason is active.
    pub fn message(&self) -> &'static str {
        match self {
            Self::NoFace => "No face detected. Please look at the camera.",
            Self::MultipleFaces => "Multiple Faces Detected",
            Self::Spectacles => "Spectacles detected! Please remove them",
            Self::TooBright => "Move to a different area, too bright",
        }
    }
}

/// Effect of a pause/resume call on the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseChange {
    /// First reason raised; the clock must freeze.
    Paused,
    /// The reason set changed but the session stays paused.
    Updated,
    /// Last reason cleared; the clock must resume.
    Resumed,
    Unchanged,
}

/// Tracks the set of active pause reasons. Paused iff the set is non-empty.
#[derive(Debug, Clone, Default)]
pub struct PauseCoordinator {
    reasons: BTreeSet<PauseReason>,
}

impl PauseCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&mut self, reason: PauseReason) -> PauseChange {
        if !self.reasons.insert(reason) {
            return PauseChange::Unchanged;
        }
        if self.reasons.len() == 1 {
            PauseChange::Paused
        } else {
            PauseChange::Updated
        }
    }

    pub fn resume(&mut self, reason: PauseReason) -> PauseChange {
        if !self.reasons.remove(&reason) {
            return PauseChange::Unchanged;
        }
        if self.reasons.is_empty() {
            PauseChange::Resumed
        } else {
            PauseChange::Updated
        }
    }

    pub fn is_paused(&self) -> bool {
        !self.reasons.is_empty()
    }

    pub fn is_active(&self, reason: PauseReason) -> bool {
        self.reasons.contains(&reason)
    }

    pub fn reasons(&self) -> impl Iterator<Item = PauseReason> + '_ {
        self.reasons.iter().copied()
    }

    /// User-facing text for the active set, `None` when running.
    pub fn message(&self) -> Option<String> {
        if self.reasons.is_empty() {
            return None;
        }
        let parts: Vec<&str> = self.reasons.iter().map(PauseReason::message).collect();
        Some(parts.join(" | "))
    }

    pub fn clear(&mut self) {
        self.reasons.clear();
    }
}
