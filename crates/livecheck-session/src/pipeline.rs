//! Per-frame gating and capture.
//!
//! Gates run in a fixed order: face count, spectacles (only during the
//! spectacles stage), brightness. A frame that leaves the session paused
//! never reaches the buffers.

use std::time::Instant;

use livecheck_core::brightness::mean_luminance;
use livecheck_core::{EarReading, Frame, LandmarkSet, SpectacleClassifier};

use crate::events::SessionEvent;
use crate::pause::PauseReason;
use crate::session::{CaptureSession, DetectionCacheEntry, FrameRecord, SessionSettings};
use crate::timer::Stage;

/// What happened to one incoming frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestOutcome {
    /// Session idle or finished; frame ignored.
    Inactive,
    /// Session is paused for this reason; nothing buffered.
    Gated(PauseReason),
    /// All gates passed but capture is not unlocked yet.
    Observed,
    /// Gates passed but the frame could not be encoded; nothing buffered.
    Dropped,
    /// Frame and EAR sample buffered. `ear` is `None` if the eye geometry was degenerate.
    Captured { ear: Option<f32> },
}

pub struct FrameIngestPipeline {
    classifier: SpectacleClassifier,
    spectacle_warning: bool,
    brightness_threshold: f32,
    jpeg_quality: u8,
}

impl FrameIngestPipeline {
    pub fn new(settings: &SessionSettings) -> Self {
        Self {
            classifier: SpectacleClassifier::new(settings.spectacle_interval),
            spectacle_warning: false,
            brightness_threshold: settings.brightness_threshold,
            jpeg_quality: settings.jpeg_quality,
        }
    }

    /// Forget per-session state before a new session starts.
    pub fn reset(&mut self) {
        self.classifier.reset();
        self.spectacle_warning = false;
    }

    pub fn spectacle_warning(&self) -> bool {
        self.spectacle_warning
    }

    pub fn ingest(
        &mut self,
        session: &mut CaptureSession,
        frame: &Frame,
        faces: &[LandmarkSet],
        now: Instant,
    ) -> IngestOutcome {
        if !session.is_active() {
            return IngestOutcome::Inactive;
        }

        if faces.len() > 1 {
            session.pause(PauseReason::MultipleFaces, now);
            return IngestOutcome::Gated(PauseReason::MultipleFaces);
        }
        session.resume(PauseReason::MultipleFaces, now);

        let Some(face) = faces.first() else {
            session.pause(PauseReason::NoFace, now);
            return IngestOutcome::Gated(PauseReason::NoFace);
        };
        session.resume(PauseReason::NoFace, now);

        if session.stage() == Stage::Spectacles {
            self.check_spectacles(session, frame, face, now);
        }

        let brightness = mean_luminance(&frame.image).unwrap_or_else(|| {
            tracing::debug!("brightness unavailable, treating frame as dark");
            0.0
        });
        if brightness > self.brightness_threshold {
            session.pause(PauseReason::TooBright, now);
            return IngestOutcome::Gated(PauseReason::TooBright);
        }
        session.resume(PauseReason::TooBright, now);

        if let Some(reason) = session.pause_reason() {
            return IngestOutcome::Gated(reason);
        }
        if !session.capture_unlocked() {
            return IngestOutcome::Observed;
        }

        // both buffers advance together or not at all
        let record = match FrameRecord::encode(frame, self.jpeg_quality) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "frame encode failed, frame dropped");
                return IngestOutcome::Dropped;
            }
        };

        let reading = EarReading::from_landmarks(face);
        let ear = reading.mean();
        session.push_frame(record);
        session.push_detection(DetectionCacheEntry::from_reading(frame.captured_at_ms, &reading), ear);

        tracing::trace!(ear = ?ear, "frame captured");
        IngestOutcome::Captured { ear }
    }

    fn check_spectacles(
        &mut self,
        session: &mut CaptureSession,
        frame: &Frame,
        face: &LandmarkSet,
        now: Instant,
    ) {
        let Some(result) = self.classifier.evaluate(now, &frame.image, face) else {
            return;
        };
        tracing::debug!(
            detected = result.detected,
            confidence = result.confidence,
            "spectacle check"
        );

        if result.detected && !self.spectacle_warning {
            self.spectacle_warning = true;
            session.notify(SessionEvent::SpectacleWarning { active: true });
            session.pause(PauseReason::Spectacles, now);
        } else if !result.detected && self.spectacle_warning {
            self.spectacle_warning = false;
            session.notify(SessionEvent::SpectacleWarning { active: false });
            session.resume(PauseReason::Spectacles, now);
        }
    }
}
