//! Session configuration.
//!
//! Every sleep and retry count used while driving NanoWrite lives here so
//! that none of them are baked into the dispatcher.

use crate::errors::NanoWriteError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bounded polling: at most `max_attempts` reads, `interval_ms` apart, and
/// never longer than `timeout_ms` in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub interval_ms: u64,
    pub max_attempts: u32,
    pub timeout_ms: u64,
}

impl RetryPolicy {
    pub const fn new(interval_ms: u64, max_attempts: u32, timeout_ms: u64) -> Self {
        Self {
            interval_ms,
            max_attempts,
            timeout_ms,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Where the message log is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// Copy the text out of the message panel on screen.
    Screen,
    /// Read the newest `*_Messages.log` in NanoWrite's message directory
    /// (`%LOCALAPPDATA%\Nanoscribe\Messages`).
    MessagesDir(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// NanoWrite version whose coordinate table to use. Detected from the
    /// window title when absent.
    pub profile: Option<String>,
    /// Substring of the target window's title.
    pub window_title: String,
    /// Optional JSON coordinate table replacing the built-in one.
    pub coordinates: Option<PathBuf>,
    /// DPI of the display NanoWrite runs on. The coordinate table is scaled
    /// from its baseline when set.
    pub dpi: Option<u32>,
    /// Consecutive terminal reads required before a job counts as done.
    pub debounce: u32,
    /// Polling of the job state while waiting for a job.
    pub poll: RetryPolicy,
    /// Read-back verification after an input sequence.
    pub verify: RetryPolicy,
    /// Pause after each click so LabView can repaint.
    pub settle_ms: u64,
    /// Pause after stage and piezo moves.
    pub move_settle_ms: u64,
    pub piezo_range: (f64, f64, f64),
    pub cache_piezo_position: bool,
    /// Directory for generated GWL files and camera pictures. A fresh
    /// temporary directory is used when absent.
    pub work_dir: Option<PathBuf>,
    pub log_source: LogSource,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: None,
            window_title: "NanoWrite".to_string(),
            coordinates: None,
            dpi: None,
            debounce: 2,
            poll: RetryPolicy::new(500, 7200, 3_600_000),
            verify: RetryPolicy::new(250, 20, 10_000),
            settle_ms: 200,
            move_settle_ms: 500,
            piezo_range: (300.0, 300.0, 300.0),
            cache_piezo_position: true,
            work_dir: None,
            log_source: LogSource::Screen,
        }
    }
}

impl Config {
    pub fn from_json_file(path: &Path) -> Result<Self, NanoWriteError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            NanoWriteError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            NanoWriteError::Config(format!("invalid config at {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), NanoWriteError> {
        if self.debounce == 0 {
            return Err(NanoWriteError::Config("debounce must be at least 1".into()));
        }
        if self.dpi == Some(0) {
            return Err(NanoWriteError::Config("dpi must be positive".into()));
        }
        for (name, policy) in [("poll", self.poll), ("verify", self.verify)] {
            if policy.max_attempts == 0 {
                return Err(NanoWriteError::Config(format!(
                    "{name}.max_attempts must be at least 1"
                )));
            }
        }
        Ok(())
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn move_settle(&self) -> Duration {
        Duration::from_millis(self.move_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nanowrite.json");
        std::fs::write(
            &path,
            r#"{"debounce": 3, "log_source": {"messages_dir": "C:\\msgs"}}"#,
        )
        .unwrap();

        let config = Config::from_json_file(&path).unwrap();
        assert_eq!(config.debounce, 3);
        assert_eq!(config.window_title, "NanoWrite");
        assert_eq!(
            config.log_source,
            LogSource::MessagesDir(PathBuf::from("C:\\msgs"))
        );
    }

    #[test]
    fn test_zero_debounce_is_rejected() {
        let config = Config {
            debounce: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(NanoWriteError::Config(_))));
    }
}
