//! livecheck-session: one liveness capture attempt, end to end.
//!
//! A [`CaptureSession`] runs a spectacles check stage followed by a capture
//! stage. Frames pass through the [`FrameIngestPipeline`] gates; any active
//! [`PauseReason`] freezes the countdown. When the capture stage runs out the
//! buffered frames and EAR samples are handed once to the
//! [`SessionCompletionHandler`]. [`spawn_engine`] wires all of this onto a
//! single owning thread driven by a periodic tick.

pub mod completion;
pub mod engine;
pub mod events;
pub mod pause;
pub mod pipeline;
pub mod session;
pub mod source;
pub mod timer;
pub mod transport;

pub use completion::{CompletionPayload, SessionCompletionHandler};
pub use engine::{spawn_engine, EngineError, EngineHandle};
pub use events::{LogObserver, SessionEvent, SessionObserver};
pub use pause::{PauseChange, PauseCoordinator, PauseReason};
pub use pipeline::{FrameIngestPipeline, IngestOutcome};
pub use session::{CaptureSession, DetectionCacheEntry, FrameRecord, SessionSettings, SessionSnapshot};
pub use source::{FrameSource, ReplaySource, SourceError, SourceFrame};
pub use timer::{CaptureSessionTimer, Stage, TimerSettings, Transition};
pub use transport::{HttpTransport, Transport, TransportError, UploadPayload, UploadReceipt};
