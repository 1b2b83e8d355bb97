//! Diagnostic collaborator seam: the stash hands it messages and errors, it
//! decides where they go. `LogReporter` forwards to the `log` facade.

use log::{log, Level};
use std::fmt;

/// Receives advisory messages and errors from the stash.
pub trait Reporter: Send + Sync {
    fn log(&self, message: &str);
    fn log_error(&self, err: &anyhow::Error);
}

/// Default reporter backed by the `log` crate.
#[derive(Debug, Clone)]
pub struct LogReporter {
    level: Level,
    target: String,
}

impl LogReporter {
    pub fn new(level: Level, target: &str) -> Self {
        Self {
            level,
            target: target.to_string(),
        }
    }
}

impl Default for LogReporter {
    fn default() -> Self {
        Self::new(Level::Debug, "QuiverStash")
    }
}

impl Reporter for LogReporter {
    fn log(&self, message: &str) {
        log!(target: &self.target, self.level, "{}", message);
    }

    fn log_error(&self, err: &anyhow::Error) {
        log!(target: &self.target, Level::Warn, "{:#}", err);
    }
}

/// Advisory raised when a serialized snapshot exceeds the configured limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeExceeded {
    pub token: String,
    pub size: usize,
    pub limit: usize,
}

impl fmt::Display for SizeExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "snapshot {} exceeded the limit of {:.1} KB. Current size: {:.1} KB",
            self.token,
            kb(self.limit),
            kb(self.size)
        )
    }
}

impl std::error::Error for SizeExceeded {}

/// Bytes -> kilobytes (decimal, as used in size reports).
pub fn kb(bytes: usize) -> f64 {
    bytes as f64 / 1000.0
}
