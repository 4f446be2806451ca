use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::events::{SessionEvent, SessionObserver};
use crate::session::{DetectionCacheEntry, FrameRecord};
use crate::transport::{Transport, TransportError, UploadPayload, UploadReceipt};

/// Buffered data of a finished session, taken exactly once.
#[derive(Debug, Clone)]
pub struct CompletionPayload {
    pub session_id: Uuid,
    pub frames: Vec<FrameRecord>,
    pub detection_cache: Vec<DetectionCacheEntry>,
}

impl CompletionPayload {
    pub fn to_upload(&self) -> UploadPayload {
        UploadPayload {
            all_frames: self.frames.iter().map(FrameRecord::data_uri).collect(),
            detection_cache: self.detection_cache.clone(),
        }
    }
}

/// Hands a finished session to the transport and reports the outcome.
/// At most one attempt per payload; there is no retry.
#[derive(Clone)]
pub struct SessionCompletionHandler {
    transport: Arc<dyn Transport>,
    observer: Arc<dyn SessionObserver>,
    delay: Duration,
}

impl SessionCompletionHandler {
    pub fn new(
        transport: Arc<dyn Transport>,
        observer: Arc<dyn SessionObserver>,
        delay: Duration,
    ) -> Self {
        Self {
            transport,
            observer,
            delay,
        }
    }

    /// Blocking. Waits the dispatch delay, uploads, then notifies
    /// `Completed` or `TransferFailed`.
    pub fn dispatch(&self, payload: CompletionPayload) -> Result<UploadReceipt, TransportError> {
        self.observer.notify(SessionEvent::Transferring {
            frames: payload.frames.len(),
            cache_entries: payload.detection_cache.len(),
        });
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let upload = payload.to_upload();
        match self.transport.upload(&upload) {
            Ok(receipt) => {
                tracing::info!(
                    session = %payload.session_id,
                    frames = upload.all_frames.len(),
                    blinked = ?receipt.blinked,
                    unblinked = ?receipt.unblinked,
                    "session uploaded"
                );
                self.observer.notify(SessionEvent::Completed);
                Ok(receipt)
            }
            Err(e) => {
                tracing::warn!(session = %payload.session_id, error = %e, "session upload failed");
                self.observer.notify(SessionEvent::TransferFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use livecheck_core::Frame;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Records payloads and answers with a fixed outcome.
    struct MockTransport {
        reject: Option<&'static str>,
        seen: Mutex<Vec<UploadPayload>>,
    }

    impl Transport for MockTransport {
        fn upload(&self, payload: &UploadPayload) -> Result<UploadReceipt, TransportError> {
            self.seen.lock().unwrap().push(payload.clone());
            match self.reject {
                Some(reason) => Err(TransportError::Rejected(reason.to_string())),
                None => Ok(UploadReceipt {
                    status: Some("success".into()),
                    ..Default::default()
                }),
            }
        }
    }

    fn payload() -> CompletionPayload {
        let frame = Frame::new(RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255])), 5);
        CompletionPayload {
            session_id: Uuid::new_v4(),
            frames: vec![FrameRecord::encode(&frame, 80).unwrap(); 3],
            detection_cache: vec![DetectionCacheEntry {
                timestamp: 5,
                ear: 0.3,
                left_ear: 0.29,
                right_ear: 0.31,
            }],
        }
    }

    fn handler(
        reject: Option<&'static str>,
    ) -> (
        SessionCompletionHandler,
        Arc<MockTransport>,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let transport = Arc::new(MockTransport {
            reject,
            seen: Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let h = SessionCompletionHandler::new(transport.clone(), Arc::new(tx), Duration::ZERO);
        (h, transport, rx)
    }

    #[test]
    fn test_upload_payload_uses_data_uris() {
        let upload = payload().to_upload();
        assert_eq!(upload.all_frames.len(), 3);
        assert!(upload.all_frames[0].starts_with("data:image/jpeg;base64,"));
        assert_eq!(upload.detection_cache.len(), 1);
    }

    #[test]
    fn test_success_notifies_completed() {
        let (h, transport, mut rx) = handler(None);
        assert!(h.dispatch(payload()).is_ok());
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Transferring {
                frames: 3,
                cache_entries: 1
            }
        );
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Completed);
    }

    #[test]
    fn test_failure_notifies_transfer_failed() {
        let (h, _transport, mut rx) = handler(Some("No frames received"));
        assert!(h.dispatch(payload()).is_err());
        let _ = rx.try_recv();
        match rx.try_recv().unwrap() {
            SessionEvent::TransferFailed { reason } => assert!(reason.contains("No frames received")),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }
}
