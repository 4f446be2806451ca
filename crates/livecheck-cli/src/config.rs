use std::path::{Path, PathBuf};
use std::time::Duration;

use livecheck_session::{SessionSettings, TimerSettings};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Names the optional TOML file read before environment overrides.
pub const CONFIG_PATH_VAR: &str = "LIVECHECK_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Client configuration: TOML file first, then `LIVECHECK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upload endpoint for finished sessions.
    pub endpoint: String,
    /// Length of the spectacles check stage.
    pub spectacles_secs: f64,
    /// Length of the capture stage.
    pub capture_secs: f64,
    pub tick_ms: u64,
    pub frame_capacity: usize,
    pub cache_capacity: usize,
    /// Minimum spacing between two spectacle checks.
    pub spectacle_interval_ms: u64,
    /// Mean luminance above which the session pauses.
    pub brightness_threshold: f32,
    pub jpeg_quality: u8,
    pub upload_timeout_secs: u64,
    /// Wait between the end of capture and the upload.
    pub dispatch_delay_ms: u64,
    /// Wait between opening the source and starting the session.
    pub startup_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: livecheck_session::transport::DEFAULT_ENDPOINT.to_string(),
            spectacles_secs: 5.0,
            capture_secs: 20.0,
            tick_ms: 100,
            frame_capacity: 100,
            cache_capacity: 10,
            spectacle_interval_ms: 500,
            brightness_threshold: 200.0,
            jpeg_quality: 85,
            upload_timeout_secs: 30,
            dispatch_delay_ms: 1000,
            startup_delay_ms: 1000,
        }
    }
}

impl Config {
    /// Load from `LIVECHECK_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `lookup`; unparsable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup("LIVECHECK_ENDPOINT") {
            self.endpoint = endpoint;
        }
        env_override(&lookup, "LIVECHECK_SPECTACLES_SECS", &mut self.spectacles_secs);
        env_override(&lookup, "LIVECHECK_CAPTURE_SECS", &mut self.capture_secs);
        env_override(&lookup, "LIVECHECK_TICK_MS", &mut self.tick_ms);
        env_override(&lookup, "LIVECHECK_FRAME_CAPACITY", &mut self.frame_capacity);
        env_override(&lookup, "LIVECHECK_CACHE_CAPACITY", &mut self.cache_capacity);
        env_override(&lookup, "LIVECHECK_SPECTACLE_INTERVAL_MS", &mut self.spectacle_interval_ms);
        env_override(&lookup, "LIVECHECK_BRIGHTNESS_THRESHOLD", &mut self.brightness_threshold);
        env_override(&lookup, "LIVECHECK_JPEG_QUALITY", &mut self.jpeg_quality);
        env_override(&lookup, "LIVECHECK_UPLOAD_TIMEOUT_SECS", &mut self.upload_timeout_secs);
        env_override(&lookup, "LIVECHECK_DISPATCH_DELAY_MS", &mut self.dispatch_delay_ms);
        env_override(&lookup, "LIVECHECK_STARTUP_DELAY_MS", &mut self.startup_delay_ms);
    }

    pub fn session_settings(&self) -> Result<SessionSettings, ConfigError> {
        if self.tick_ms == 0 {
            return Err(invalid("tick_ms", "must be positive"));
        }
        if self.frame_capacity == 0 {
            return Err(invalid("frame_capacity", "must be positive"));
        }
        if self.cache_capacity == 0 {
            return Err(invalid("cache_capacity", "must be positive"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(invalid("jpeg_quality", "must be within 1..=100"));
        }

        Ok(SessionSettings {
            timer: TimerSettings {
                spectacles: secs("spectacles_secs", self.spectacles_secs)?,
                capture: secs("capture_secs", self.capture_secs)?,
            },
            tick_interval: Duration::from_millis(self.tick_ms),
            frame_capacity: self.frame_capacity,
            cache_capacity: self.cache_capacity,
            spectacle_interval: Duration::from_millis(self.spectacle_interval_ms),
            brightness_threshold: self.brightness_threshold,
            jpeg_quality: self.jpeg_quality,
            dispatch_delay: Duration::from_millis(self.dispatch_delay_ms),
        })
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}

fn env_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable override"),
    }
}

fn secs(key: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|e| invalid(key, &e.to_string()))
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}
