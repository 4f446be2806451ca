//! Single owner of a capture session.
//!
//! Frames and timer ticks arrive from different tasks; both are funnelled
//! through one channel into a dedicated thread that owns the session and the
//! pipeline, so every mutation is serialized.

use std::sync::Arc;
use std::time::{Duration, Instant};

use livecheck_core::{Frame, LandmarkSet};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::completion::{CompletionPayload, SessionCompletionHandler};
use crate::events::{SessionEvent, SessionObserver};
use crate::pipeline::{FrameIngestPipeline, IngestOutcome};
use crate::session::{CaptureSession, SessionSettings, SessionSnapshot};
use crate::timer::Transition;
use crate::transport::Transport;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("session already started")]
    AlreadyStarted,
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("no tokio runtime available for the session ticker")]
    NoRuntime,
}

/// Messages sent to the engine thread.
enum EngineRequest {
    Start {
        reply: oneshot::Sender<Result<Uuid, EngineError>>,
    },
    Frame {
        frame: Frame,
        faces: Vec<LandmarkSet>,
        reply: oneshot::Sender<IngestOutcome>,
    },
    Tick,
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Abort {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Start the session and its ticker. Fails if it was started before.
    pub async fn start(&self) -> Result<Uuid, EngineError> {
        self.request(|reply| EngineRequest::Start { reply }).await?
    }

    /// Run one frame through the gates.
    pub async fn submit_frame(
        &self,
        frame: Frame,
        faces: Vec<LandmarkSet>,
    ) -> Result<IngestOutcome, EngineError> {
        self.request(|reply| EngineRequest::Frame {
            frame,
            faces,
            reply,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, EngineError> {
        self.request(|reply| EngineRequest::Snapshot { reply }).await
    }

    /// Stop the session; nothing is uploaded.
    pub async fn abort(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Abort { reply }).await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Must be called from within a tokio runtime, which later hosts the tick task.
pub fn spawn_engine(
    settings: SessionSettings,
    transport: Arc<dyn Transport>,
    observer: Arc<dyn SessionObserver>,
) -> Result<EngineHandle, EngineError> {
    let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);
    let weak = tx.downgrade();

    let completion = SessionCompletionHandler::new(transport, observer.clone(), settings.dispatch_delay);
    let mut session = CaptureSession::new(&settings, observer.clone());
    let mut pipeline = FrameIngestPipeline::new(&settings);
    let tick_interval = settings.tick_interval;

    std::thread::Builder::new()
        .name("livecheck-engine".into())
        .spawn(move || {
            tracing::info!(session = %session.id(), "engine thread started");
            let mut ticker: Option<JoinHandle<()>> = None;

            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Start { reply } => {
                        let result = if session.start(Instant::now()) {
                            pipeline.reset();
                            ticker = Some(runtime.spawn(run_ticker(weak.clone(), tick_interval)));
                            Ok(session.id())
                        } else {
                            Err(EngineError::AlreadyStarted)
                        };
                        let _ = reply.send(result);
                    }
                    EngineRequest::Frame {
                        frame,
                        faces,
                        reply,
                    } => {
                        let outcome = pipeline.ingest(&mut session, &frame, &faces, Instant::now());
                        let _ = reply.send(outcome);
                    }
                    EngineRequest::Tick => {
                        if session.tick(Instant::now()) == Some(Transition::Finished) {
                            stop_ticker(&mut ticker);
                            if let Some(payload) = session.take_completion() {
                                dispatch(&completion, &observer, payload);
                            }
                        }
                    }
                    EngineRequest::Snapshot { reply } => {
                        let _ = reply.send(session.snapshot());
                    }
                    EngineRequest::Abort { reply } => {
                        session.abort();
                        stop_ticker(&mut ticker);
                        let _ = reply.send(());
                    }
                }
            }

            stop_ticker(&mut ticker);
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

/// Posts a `Tick` every `period` until the engine goes away or the task is aborted.
async fn run_ticker(weak: mpsc::WeakSender<EngineRequest>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(tx) = weak.upgrade() else {
            break;
        };
        if tx.send(EngineRequest::Tick).await.is_err() {
            break;
        }
    }
}

fn stop_ticker(ticker: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = ticker.take() {
        handle.abort();
    }
}

/// Fire-and-forget upload on its own thread so the engine keeps serving requests.
fn dispatch(
    completion: &SessionCompletionHandler,
    observer: &Arc<dyn SessionObserver>,
    payload: CompletionPayload,
) {
    let handler = completion.clone();
    let spawned = std::thread::Builder::new()
        .name("livecheck-upload".into())
        .spawn(move || {
            let _ = handler.dispatch(payload);
        });
    if let Err(e) = spawned {
        tracing::error!(error = %e, "failed to spawn upload thread");
        observer.notify(SessionEvent::TransferFailed {
            reason: e.to_string(),
        });
    }
}
