use serde::Serialize;
use tokio::sync::mpsc;

use crate::timer::Stage;

pub const CAPTURE_MESSAGE: &str = "Capturing Images... Blink naturally";
pub const TRANSFER_MESSAGE: &str = "Transferring frames to server for classification...";
pub const TRANSFER_FAILED_MESSAGE: &str = "Transfer failed";

/// Notifications for the user-facing collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Started,
    /// Whole seconds left in the spectacles stage, rounded up.
    Countdown { seconds_left: u32 },
    CaptureStarted,
    Paused { message: String },
    Resumed { stage: Stage },
    SpectacleWarning { active: bool },
    Transferring { frames: usize, cache_entries: usize },
    /// Upload accepted; the caller may navigate to its completed view.
    Completed,
    TransferFailed { reason: String },
    Aborted,
}

impl SessionEvent {
    /// Text to display for this event, if it replaces the current message.
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Countdown { seconds_left } => Some(format!("Welcome ({seconds_left}s)")),
            Self::CaptureStarted => Some(CAPTURE_MESSAGE.to_string()),
            Self::Paused { message } => Some(message.clone()),
            Self::Resumed { stage } => match stage {
                Stage::Spectacles => Some("Welcome".to_string()),
                Stage::Capture => Some(CAPTURE_MESSAGE.to_string()),
                Stage::Idle | Stage::Done => None,
            },
            Self::Transferring { .. } => Some(TRANSFER_MESSAGE.to_string()),
            Self::TransferFailed { .. } => Some(TRANSFER_FAILED_MESSAGE.to_string()),
            Self::Started
            | Self::SpectacleWarning { .. }
            | Self::Completed
            | Self::Aborted => None,
        }
    }
}

/// Receives session notifications. Called from the engine and upload threads.
pub trait SessionObserver: Send + Sync {
    fn notify(&self, event: SessionEvent);
}

/// Observer that only logs.
pub struct LogObserver;

impl SessionObserver for LogObserver {
    fn notify(&self, event: SessionEvent) {
        match event.message() {
            Some(message) => tracing::info!(event = ?event, %message, "session event"),
            None => tracing::info!(event = ?event, "session event"),
        }
    }
}

impl SessionObserver for mpsc::UnboundedSender<SessionEvent> {
    fn notify(&self, event: SessionEvent) {
        // receiver gone means nobody is watching; the session carries on
        let _ = self.send(event);
    }
}
