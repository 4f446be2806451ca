//! Drives a whole session on synthetic time: a 30 fps frame source and the
//! 100 ms tick, without threads.

use std::ops::Range;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};
use livecheck_core::types::{LANDMARK_COUNT, LEFT_EYE, RIGHT_EYE};
use livecheck_core::{Frame, LandmarkSet, Point};
use livecheck_session::{
    CaptureSession, FrameIngestPipeline, SessionCompletionHandler, SessionEvent, SessionSettings,
    Stage, Transport, TransportError, UploadPayload, UploadReceipt,
};
use tokio::sync::mpsc;

const FRAME_MS: u64 = 33;
const TICK_MS: u64 = 100;
const RUN_MS: u64 = 30_000;

#[derive(Default)]
struct CountingTransport {
    uploads: Mutex<Vec<UploadPayload>>,
}

impl Transport for CountingTransport {
    fn upload(&self, payload: &UploadPayload) -> Result<UploadReceipt, TransportError> {
        self.uploads.lock().unwrap().push(payload.clone());
        Ok(UploadReceipt {
            status: Some("success".into()),
            ..Default::default()
        })
    }
}

fn face() -> LandmarkSet {
    let offsets = [
        (-0.0625, 0.0),
        (-0.03125, -0.025),
        (0.03125, -0.025),
        (0.0625, 0.0),
        (0.03125, 0.025),
        (-0.03125, 0.025),
    ];
    let mut points = vec![Point::new(0.5, 0.75); LANDMARK_COUNT];
    for (idx, cx) in [(&LEFT_EYE, 0.375f32), (&RIGHT_EYE, 0.625)] {
        for (i, (dx, dy)) in idx.iter().zip(offsets) {
            points[*i] = Point::new(cx + dx, 0.5 + dy);
        }
    }
    LandmarkSet::new(points)
}

struct Run {
    done_at: Option<u64>,
    transport: Arc<CountingTransport>,
    events: Vec<SessionEvent>,
}

/// Simulate `RUN_MS` of wall time. Frames inside `no_face` carry no landmarks.
fn simulate(no_face: Option<Range<u64>>) -> Run {
    let settings = SessionSettings {
        dispatch_delay: Duration::ZERO,
        ..SessionSettings::default()
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    let observer = Arc::new(tx);
    let transport = Arc::new(CountingTransport::default());
    let handler =
        SessionCompletionHandler::new(transport.clone(), observer.clone(), settings.dispatch_delay);

    let mut session = CaptureSession::new(&settings, observer);
    let mut pipeline = FrameIngestPipeline::new(&settings);
    let image = RgbaImage::from_pixel(96, 72, Rgba([110, 110, 110, 255]));
    let face = face();

    let t0 = Instant::now();
    session.start(t0);
    let mut done_at = None;

    for t in 1..=RUN_MS {
        let now = t0 + Duration::from_millis(t);
        if t % TICK_MS == 0 {
            session.tick(now);
            if let Some(payload) = session.take_completion() {
                done_at = Some(t);
                handler.dispatch(payload).unwrap();
            }
        }
        if t % FRAME_MS == 0 {
            let frame = Frame::new(image.clone(), t as i64);
            let hidden = no_face.as_ref().is_some_and(|r| r.contains(&t));
            let faces = if hidden { vec![] } else { vec![face.clone()] };
            pipeline.ingest(&mut session, &frame, &faces, now);
        }
    }

    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    assert_eq!(session.stage(), Stage::Done);
    Run {
        done_at,
        transport,
        events,
    }
}

#[test]
fn uninterrupted_session_uploads_bounded_buffers_once() {
    let run = simulate(None);
    assert_eq!(run.done_at, Some(25_000));

    let uploads = run.transport.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    let upload = &uploads[0];
    assert_eq!(upload.all_frames.len(), 100);
    assert_eq!(upload.detection_cache.len(), 10);

    // newest entries survive, oldest first
    let stamps: Vec<i64> = upload.detection_cache.iter().map(|e| e.timestamp).collect();
    let last = (24_999 / FRAME_MS * FRAME_MS) as i64;
    assert_eq!(*stamps.last().unwrap(), last);
    assert!(stamps.windows(2).all(|w| w[1] - w[0] == FRAME_MS as i64));
    assert!(upload.detection_cache.iter().all(|e| e.ear > 0.0));

    assert!(run.events.contains(&SessionEvent::CaptureStarted));
    assert_eq!(run.events.last(), Some(&SessionEvent::Completed));
}

#[test]
fn face_loss_extends_capture_by_the_paused_time() {
    // first hidden frame 10_032, first visible again 12_012: 1_980 ms paused
    let run = simulate(Some(10_000..12_000));
    assert_eq!(run.done_at, Some(27_000));
    assert_eq!(run.transport.uploads.lock().unwrap().len(), 1);

    let paused = run
        .events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Paused { .. }))
        .count();
    assert_eq!(paused, 1);
    assert!(run.events.contains(&SessionEvent::Resumed {
        stage: Stage::Capture
    }));
}
