use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::buffer::ConvertBuffer;
use image::RgbImage;
use livecheck_core::brightness::DEFAULT_BRIGHTNESS_THRESHOLD;
use livecheck_core::ear::INVALID_EAR;
use livecheck_core::spectacles::DEFAULT_CHECK_INTERVAL;
use livecheck_core::{BlinkTracker, BoundedBuffer, EarReading, Frame};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::completion::CompletionPayload;
use crate::events::{SessionEvent, SessionObserver};
use crate::pause::{PauseChange, PauseCoordinator, PauseReason};
use crate::timer::{CaptureSessionTimer, Stage, TimerSettings, Transition, DEFAULT_TICK_INTERVAL};

pub const DEFAULT_FRAME_CAPACITY: usize = 100;
pub const DEFAULT_CACHE_CAPACITY: usize = 10;
pub const DEFAULT_JPEG_QUALITY: u8 = 85;
pub const DEFAULT_DISPATCH_DELAY: Duration = Duration::from_secs(1);

/// Every tunable of a capture session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub timer: TimerSettings,
    pub tick_interval: Duration,
    pub frame_capacity: usize,
    pub cache_capacity: usize,
    pub spectacle_interval: Duration,
    pub brightness_threshold: f32,
    pub jpeg_quality: u8,
    /// Wait between reaching `Done` and starting the upload.
    pub dispatch_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timer: TimerSettings::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            frame_capacity: DEFAULT_FRAME_CAPACITY,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            spectacle_interval: DEFAULT_CHECK_INTERVAL,
            brightness_threshold: DEFAULT_BRIGHTNESS_THRESHOLD,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            dispatch_delay: DEFAULT_DISPATCH_DELAY,
        }
    }
}

/// One captured frame, JPEG encoded at capture time.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    jpeg: Arc<[u8]>,
    pub captured_at_ms: i64,
}

impl FrameRecord {
    pub fn encode(frame: &Frame, quality: u8) -> Result<Self, image::ImageError> {
        let rgb: RgbImage = frame.image.convert();

        let mut out = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut out, quality).encode_image(&rgb)?;

        Ok(Self {
            jpeg: out.into_inner().into(),
            captured_at_ms: frame.captured_at_ms,
        })
    }

    pub fn jpeg(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn data_uri(&self) -> String {
        format!("data:image/jpeg;base64,{}", STANDARD.encode(&self.jpeg))
    }
}

/// EAR sample recorded for one captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionCacheEntry {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub ear: f32,
    #[serde(rename = "leftEAR")]
    pub left_ear: f32,
    #[serde(rename = "rightEAR")]
    pub right_ear: f32,
}

impl DetectionCacheEntry {
    /// Values are rounded to three decimals; invalid eyes become [`INVALID_EAR`].
    pub fn from_reading(timestamp: i64, reading: &EarReading) -> Self {
        let wire = |v: Option<f32>| v.map(round3).unwrap_or(INVALID_EAR);
        Self {
            timestamp,
            ear: wire(reading.mean()),
            left_ear: wire(reading.left),
            right_ear: wire(reading.right),
        }
    }
}

fn round3(v: f32) -> f32 {
    (v * 1000.0).round() / 1000.0
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub stage: Stage,
    pub spectacles_remaining: f64,
    pub capture_remaining: f64,
    pub paused: bool,
    pub pause_reasons: Vec<PauseReason>,
    pub frames: usize,
    pub cache_entries: usize,
    pub blinks: u32,
}

/// State of one verification attempt: timer, pause reasons and buffers.
///
/// Not thread-safe by itself; a caller sharing it between a tick source and
/// a frame source must serialize access (see [`crate::engine`]).
pub struct CaptureSession {
    id: Uuid,
    timer: CaptureSessionTimer,
    pauses: PauseCoordinator,
    frames: BoundedBuffer<FrameRecord>,
    cache: BoundedBuffer<DetectionCacheEntry>,
    blinks: BlinkTracker,
    observer: Arc<dyn SessionObserver>,
    last_countdown: Option<u32>,
    completion_taken: bool,
}

impl CaptureSession {
    pub fn new(settings: &SessionSettings, observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timer: CaptureSessionTimer::new(settings.timer),
            pauses: PauseCoordinator::new(),
            frames: BoundedBuffer::new(settings.frame_capacity),
            cache: BoundedBuffer::new(settings.cache_capacity),
            blinks: BlinkTracker::new(),
            observer,
            last_countdown: None,
            completion_taken: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Begin the spectacles stage. Returns false unless the session was idle.
    pub fn start(&mut self, now: Instant) -> bool {
        if !self.timer.start(now) {
            return false;
        }
        self.pauses.clear();
        self.frames.clear();
        self.cache.clear();
        self.blinks = BlinkTracker::new();
        self.last_countdown = None;

        tracing::info!(
            session = %self.id,
            spectacles_secs = self.timer.spectacles_remaining(),
            capture_secs = self.timer.capture_remaining(),
            "session started"
        );
        self.observer.notify(SessionEvent::Started);
        self.emit_countdown();
        true
    }

    pub fn tick(&mut self, now: Instant) -> Option<Transition> {
        let transition = self.timer.tick(now);
        match transition {
            Some(Transition::CaptureUnlocked) => {
                tracing::info!(session = %self.id, "spectacles stage complete, capture unlocked");
                self.observer.notify(SessionEvent::CaptureStarted);
            }
            Some(Transition::Finished) => {
                tracing::info!(
                    session = %self.id,
                    frames = self.frames.len(),
                    cache_entries = self.cache.len(),
                    blinks = self.blinks.blinks(),
                    "capture stage complete"
                );
            }
            None => {
                if self.timer.stage() == Stage::Spectacles && !self.pauses.is_paused() {
                    self.emit_countdown();
                }
            }
        }
        transition
    }

    fn emit_countdown(&mut self) {
        let seconds_left = self.timer.spectacles_remaining().ceil() as u32;
        if self.last_countdown != Some(seconds_left) {
            self.last_countdown = Some(seconds_left);
            self.observer.notify(SessionEvent::Countdown { seconds_left });
        }
    }

    pub fn pause(&mut self, reason: PauseReason, now: Instant) {
        match self.pauses.pause(reason) {
            PauseChange::Paused => {
                self.timer.freeze(now);
                tracing::info!(session = %self.id, reason = reason.as_str(), "session paused");
                self.notify_paused();
            }
            PauseChange::Updated => {
                tracing::debug!(session = %self.id, reason = reason.as_str(), "pause reason added");
                self.notify_paused();
            }
            PauseChange::Resumed | PauseChange::Unchanged => {}
        }
    }

    pub fn resume(&mut self, reason: PauseReason, now: Instant) {
        match self.pauses.resume(reason) {
            PauseChange::Resumed => {
                self.timer.unfreeze(now);
                self.last_countdown = None;
                tracing::info!(session = %self.id, reason = reason.as_str(), "session resumed");
                self.observer.notify(SessionEvent::Resumed {
                    stage: self.timer.stage(),
                });
            }
            PauseChange::Updated => {
                tracing::debug!(session = %self.id, reason = reason.as_str(), "pause reason cleared");
                self.notify_paused();
            }
            PauseChange::Paused | PauseChange::Unchanged => {}
        }
    }

    fn notify_paused(&self) {
        if let Some(message) = self.pauses.message() {
            self.observer.notify(SessionEvent::Paused { message });
        }
    }

    pub fn notify(&self, event: SessionEvent) {
        self.observer.notify(event);
    }

    pub fn stage(&self) -> Stage {
        self.timer.stage()
    }

    pub fn is_active(&self) -> bool {
        self.timer.is_running()
    }

    pub fn is_paused(&self) -> bool {
        self.pauses.is_paused()
    }

    /// Lowest-ordered active pause reason, if any.
    pub fn pause_reason(&self) -> Option<PauseReason> {
        self.pauses.reasons().next()
    }

    pub fn capture_unlocked(&self) -> bool {
        self.timer.capture_unlocked()
    }

    pub fn timer(&self) -> &CaptureSessionTimer {
        &self.timer
    }

    pub fn push_frame(&mut self, record: FrameRecord) {
        self.frames.push(record);
    }

    pub fn push_detection(&mut self, entry: DetectionCacheEntry, ear: Option<f32>) {
        self.cache.push(entry);
        if let Some(ear) = ear {
            if self.blinks.update(ear) {
                tracing::debug!(session = %self.id, blinks = self.blinks.blinks(), "blink observed");
            }
        }
    }

    /// Stop the session without producing a completion payload.
    pub fn abort(&mut self) {
        if self.timer.stage() == Stage::Done {
            return;
        }
        self.timer.finish();
        self.completion_taken = true;
        tracing::info!(session = %self.id, "session aborted");
        self.observer.notify(SessionEvent::Aborted);
    }

    /// Buffered data for upload. Yields `Some` at most once, and only after
    /// the capture stage ran out.
    pub fn take_completion(&mut self) -> Option<CompletionPayload> {
        if self.timer.stage() != Stage::Done || self.completion_taken {
            return None;
        }
        self.completion_taken = true;
        Some(CompletionPayload {
            session_id: self.id,
            frames: self.frames.snapshot(),
            detection_cache: self.cache.snapshot(),
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            stage: self.timer.stage(),
            spectacles_remaining: self.timer.spectacles_remaining(),
            capture_remaining: self.timer.capture_remaining(),
            paused: self.pauses.is_paused(),
            pause_reasons: self.pauses.reasons().collect(),
            frames: self.frames.len(),
            cache_entries: self.cache.len(),
            blinks: self.blinks.blinks(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tokio::sync::mpsc;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn session() -> (CaptureSession, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CaptureSession::new(&SessionSettings::default(), Arc::new(tx)), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    fn record() -> FrameRecord {
        let frame = Frame::new(RgbaImage::from_pixel(8, 8, Rgba([90, 90, 90, 255])), 1);
        FrameRecord::encode(&frame, 80).unwrap()
    }

    #[test]
    fn test_start_emits_started_and_countdown() {
        let (mut s, mut rx) = session();
        assert!(s.start(Instant::now()));
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::Started,
                SessionEvent::Countdown { seconds_left: 5 }
            ]
        );
        assert!(s.is_active());
    }

    #[test]
    fn test_countdown_emitted_once_per_second() {
        let (mut s, mut rx) = session();
        let t0 = Instant::now();
        s.start(t0);
        drain(&mut rx);
        for t in (100..=2000).step_by(100) {
            s.tick(t0 + ms(t));
        }
        let countdowns: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::Countdown { .. }))
            .collect();
        assert_eq!(
            countdowns,
            vec![
                SessionEvent::Countdown { seconds_left: 4 },
                SessionEvent::Countdown { seconds_left: 3 }
            ]
        );
    }

    #[test]
    fn test_pause_freezes_timer_until_all_reasons_clear() {
        let (mut s, mut rx) = session();
        let t0 = Instant::now();
        s.start(t0);
        s.pause(PauseReason::TooBright, t0);
        s.pause(PauseReason::NoFace, t0);
        s.tick(t0 + ms(1000));
        assert_eq!(s.timer().spectacles_remaining(), 5.0);

        s.resume(PauseReason::NoFace, t0 + ms(1000));
        assert!(s.is_paused());
        s.tick(t0 + ms(2000));
        assert_eq!(s.timer().spectacles_remaining(), 5.0);

        s.resume(PauseReason::TooBright, t0 + ms(2000));
        assert!(!s.is_paused());
        s.tick(t0 + ms(2500));
        assert!((s.timer().spectacles_remaining() - 4.5).abs() < 1e-9);

        let events = drain(&mut rx);
        assert!(events.contains(&SessionEvent::Paused {
            message: PauseReason::TooBright.message().to_string()
        }));
        assert!(events.contains(&SessionEvent::Resumed {
            stage: Stage::Spectacles
        }));
    }

    #[test]
    fn test_completion_taken_once() {
        let (mut s, _rx) = session();
        let t0 = Instant::now();
        s.start(t0);
        s.push_frame(record());
        assert!(s.take_completion().is_none());

        s.tick(t0 + ms(5000));
        s.tick(t0 + ms(25_000));
        assert_eq!(s.stage(), Stage::Done);

        let payload = s.take_completion().unwrap();
        assert_eq!(payload.frames.len(), 1);
        assert_eq!(payload.session_id, s.id());
        assert!(s.take_completion().is_none());
    }

    #[test]
    fn test_abort_suppresses_completion() {
        let (mut s, mut rx) = session();
        s.start(Instant::now());
        s.abort();
        assert_eq!(s.stage(), Stage::Done);
        assert!(s.take_completion().is_none());
        assert!(drain(&mut rx).contains(&SessionEvent::Aborted));
    }

    #[test]
    fn test_cache_entry_rounding_and_sentinel() {
        let reading = EarReading {
            left: Some(0.31234),
            right: None,
        };
        let entry = DetectionCacheEntry::from_reading(42, &reading);
        assert_eq!(entry.timestamp, 42);
        assert!((entry.left_ear - 0.312).abs() < 1e-6);
        assert_eq!(entry.right_ear, INVALID_EAR);
        assert_eq!(entry.ear, INVALID_EAR);
    }

    #[test]
    fn test_cache_entry_wire_names() {
        let entry = DetectionCacheEntry {
            timestamp: 1,
            ear: 0.3,
            left_ear: 0.2,
            right_ear: 0.4,
        };
        let json = serde_json::to_value(entry).unwrap();
        assert!(json.get("leftEAR").is_some());
        assert!(json.get("rightEAR").is_some());
        assert!(json.get("ear").is_some());
    }

    #[test]
    fn test_frame_record_data_uri() {
        let rec = record();
        assert_eq!(&rec.jpeg()[..2], &[0xFF, 0xD8]);
        assert!(rec.data_uri().starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_push_detection_counts_blinks() {
        let (mut s, _rx) = session();
        s.start(Instant::now());
        let entry = DetectionCacheEntry::from_reading(0, &EarReading::default());
        for ear in [0.4, 0.2, 0.4, 0.1, 0.45] {
            s.push_detection(entry, Some(ear));
        }
        assert_eq!(s.snapshot().blinks, 2);
    }
}
