//! Stage countdowns for one capture session.
//!
//! The timer never reads the clock itself: every call takes `now`, so tests
//! can drive it with synthetic instants. Elapsed time is charged per tick as
//! the delta from the previous sample; while frozen, ticks only re-sample, so
//! a paused interval is never charged once the timer resumes. Countdowns are
//! kept as `Duration`s so repeated ticks do not accumulate rounding error.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Default length of the spectacles check stage.
pub const DEFAULT_SPECTACLES_DURATION: Duration = Duration::from_secs(5);
/// Default length of the capture stage. The only place the capture length is defined.
pub const DEFAULT_CAPTURE_DURATION: Duration = Duration::from_secs(20);
/// Default period of the driving tick.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Idle,
    Spectacles,
    Capture,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Spectacles => "spectacles",
            Self::Capture => "capture",
            Self::Done => "done",
        }
    }
}

/// Stage change produced by a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Spectacles stage elapsed; frames may now be captured.
    CaptureUnlocked,
    /// Capture stage elapsed; the session is done.
    Finished,
}

#[derive(Debug, Clone, Copy)]
pub struct TimerSettings {
    pub spectacles: Duration,
    pub capture: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            spectacles: DEFAULT_SPECTACLES_DURATION,
            capture: DEFAULT_CAPTURE_DURATION,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureSessionTimer {
    settings: TimerSettings,
    stage: Stage,
    spectacles_remaining: Duration,
    capture_remaining: Duration,
    frozen: bool,
    last_tick: Option<Instant>,
    capture_unlocked: bool,
}

impl CaptureSessionTimer {
    pub fn new(settings: TimerSettings) -> Self {
        Self {
            settings,
            stage: Stage::Idle,
            spectacles_remaining: settings.spectacles,
            capture_remaining: settings.capture,
            frozen: false,
            last_tick: None,
            capture_unlocked: false,
        }
    }

    /// Move `Idle -> Spectacles` and reset both countdowns. No-op in any other stage.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.stage != Stage::Idle {
            return false;
        }
        self.spectacles_remaining = self.settings.spectacles;
        self.capture_remaining = self.settings.capture;
        self.stage = Stage::Spectacles;
        self.frozen = false;
        self.capture_unlocked = false;
        self.last_tick = Some(now);
        true
    }

    /// Charge elapsed time to the current stage and report a stage change, if any.
    pub fn tick(&mut self, now: Instant) -> Option<Transition> {
        if !self.is_running() {
            return None;
        }
        let last = self.last_tick.replace(now).unwrap_or(now);
        if self.frozen {
            return None;
        }
        let dt = now.saturating_duration_since(last);

        match self.stage {
            Stage::Spectacles => {
                self.spectacles_remaining = self.spectacles_remaining.saturating_sub(dt);
                if self.spectacles_remaining.is_zero() {
                    self.stage = Stage::Capture;
                    self.capture_unlocked = true;
                    return Some(Transition::CaptureUnlocked);
                }
            }
            Stage::Capture => {
                self.capture_remaining = self.capture_remaining.saturating_sub(dt);
                if self.capture_remaining.is_zero() {
                    self.stage = Stage::Done;
                    self.capture_unlocked = false;
                    return Some(Transition::Finished);
                }
            }
            Stage::Idle | Stage::Done => {}
        }
        None
    }

    /// Stop charging time. Time since the last tick is charged first, without
    /// changing stage; the next tick after [`unfreeze`](Self::unfreeze) handles
    /// an exhausted countdown.
    pub fn freeze(&mut self, now: Instant) {
        if !self.is_running() || self.frozen {
            return;
        }
        if let Some(last) = self.last_tick.replace(now) {
            let dt = now.saturating_duration_since(last);
            match self.stage {
                Stage::Spectacles => {
                    self.spectacles_remaining = self.spectacles_remaining.saturating_sub(dt)
                }
                Stage::Capture => self.capture_remaining = self.capture_remaining.saturating_sub(dt),
                Stage::Idle | Stage::Done => {}
            }
        }
        self.frozen = true;
    }

    /// Resume charging time from `now`.
    pub fn unfreeze(&mut self, now: Instant) {
        if !self.frozen {
            return;
        }
        self.frozen = false;
        self.last_tick = Some(now);
    }

    /// Jump to `Done` without a transition (external abort).
    pub fn finish(&mut self) {
        self.stage = Stage::Done;
        self.capture_unlocked = false;
        self.frozen = false;
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_running(&self) -> bool {
        matches!(self.stage, Stage::Spectacles | Stage::Capture)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn capture_unlocked(&self) -> bool {
        self.capture_unlocked
    }

    /// Seconds left in the spectacles stage.
    pub fn spectacles_remaining(&self) -> f64 {
        self.spectacles_remaining.as_secs_f64()
    }

    /// Seconds left in the capture stage.
    pub fn capture_remaining(&self) -> f64 {
        self.capture_remaining.as_secs_f64()
    }

    pub fn settings(&self) -> &TimerSettings {
        &self.settings
    }
}
