//! Engine configuration.

use crate::queue::DEFAULT_COMPACT_THRESHOLD;
use std::env;
use std::path::PathBuf;

/// Settings for a [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Root directory for file-backed storage
    pub data_dir: PathBuf,
    /// Acknowledged log entries tolerated before the queue log is rewritten
    pub compact_threshold: usize,
    /// Attempt a flush right after a direct push fails
    pub flush_after_failed_push: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("duet-data"),
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            flush_after_failed_push: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let data_dir = env::var("DUET_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let compact_threshold = match env::var("DUET_QUEUE_COMPACT_THRESHOLD") {
            Ok(value) => value
                .parse::<usize>()
                .ok()
                .filter(|threshold| *threshold > 0)
                .ok_or(ConfigError::InvalidCompactThreshold(value))?,
            Err(_) => defaults.compact_threshold,
        };

        let flush_after_failed_push = match env::var("DUET_FLUSH_AFTER_FAILED_PUSH") {
            Ok(value) => parse_bool(&value).ok_or(ConfigError::InvalidFlag {
                name: "DUET_FLUSH_AFTER_FAILED_PUSH",
                value,
            })?,
            Err(_) => defaults.flush_after_failed_push,
        };

        Ok(Self {
            data_dir,
            compact_threshold,
            flush_after_failed_push,
        })
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid DUET_QUEUE_COMPACT_THRESHOLD value: {0}")]
    InvalidCompactThreshold(String),

    #[error("Invalid {name} value: {value}")]
    InvalidFlag { name: &'static str, value: String },
}
