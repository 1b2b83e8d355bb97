//! Centralized configuration and builder for QuiverStash.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - StashConfig::from_env() reads QS_* variables on top of the defaults.
//! - StashBuilder returns a StashConfig which `Stash::open` consumes.
//!
//! Defaults:
//! - size_limit_bytes = 512 KiB (transport-channel budget used by the oversized advisory)
//! - flush_wait_ms = 5000 (bounded wait on background transition)
//! - warm_load_wait_ms = 1000 (bounded wait on the first durable read)
//! - worker_keepalive_ms = 60000 (idle worker threads retire after this)

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::consts::{
    DEFAULT_FLUSH_WAIT_MS, DEFAULT_SIZE_LIMIT_BYTES, DEFAULT_WARM_LOAD_WAIT_MS,
    DEFAULT_WORKER_KEEPALIVE_MS, STORE_DIR_NAME,
};

/// Top-level configuration for a [`crate::Stash`].
#[derive(Clone, Debug)]
pub struct StashConfig {
    /// Directory holding one record file per token.
    /// Env: QS_DIR (default <tmp>/quiverstash)
    pub dir: PathBuf,

    /// Serialized size above which a snapshot is reported as oversized.
    /// Env: QS_SIZE_LIMIT_BYTES (default 524288)
    pub size_limit_bytes: usize,

    /// Max time a background-transition notification blocks for pending flushes.
    /// Env: QS_FLUSH_WAIT_MS (default 5000)
    pub flush_wait_ms: u64,

    /// Max time the first durable read waits for the startup warm-load.
    /// Env: QS_WARM_LOAD_WAIT_MS (default 1000)
    pub warm_load_wait_ms: u64,

    /// Idle keep-alive of background worker threads.
    /// Env: QS_WORKER_KEEPALIVE_MS (default 60000)
    pub worker_keepalive_ms: u64,

    /// Send the oversized advisory to the reporter.
    /// Env: QS_REPORT_OVERSIZED = 0|1 (default 1)
    pub report_oversized: bool,
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().join(STORE_DIR_NAME),
            size_limit_bytes: DEFAULT_SIZE_LIMIT_BYTES,
            flush_wait_ms: DEFAULT_FLUSH_WAIT_MS,
            warm_load_wait_ms: DEFAULT_WARM_LOAD_WAIT_MS,
            worker_keepalive_ms: DEFAULT_WORKER_KEEPALIVE_MS,
            report_oversized: true,
        }
    }
}

fn env_flag(v: &str) -> bool {
    let s = v.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "yes" || s == "on"
}

impl StashConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("QS_DIR") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.dir = PathBuf::from(s);
            }
        }

        if let Ok(v) = std::env::var("QS_SIZE_LIMIT_BYTES") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.size_limit_bytes = n;
            }
        }

        if let Ok(v) = std::env::var("QS_FLUSH_WAIT_MS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.flush_wait_ms = n;
            }
        }

        if let Ok(v) = std::env::var("QS_WARM_LOAD_WAIT_MS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.warm_load_wait_ms = n;
            }
        }

        if let Ok(v) = std::env::var("QS_WORKER_KEEPALIVE_MS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.worker_keepalive_ms = n;
            }
        }

        if let Ok(v) = std::env::var("QS_REPORT_OVERSIZED") {
            cfg.report_oversized = env_flag(&v);
        }

        cfg
    }

    pub fn with_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn with_size_limit_bytes(mut self, n: usize) -> Self {
        self.size_limit_bytes = n;
        self
    }

    pub fn with_flush_wait_ms(mut self, ms: u64) -> Self {
        self.flush_wait_ms = ms;
        self
    }

    pub fn with_warm_load_wait_ms(mut self, ms: u64) -> Self {
        self.warm_load_wait_ms = ms;
        self
    }

    pub fn with_worker_keepalive_ms(mut self, ms: u64) -> Self {
        self.worker_keepalive_ms = ms;
        self
    }

    pub fn with_report_oversized(mut self, on: bool) -> Self {
        self.report_oversized = on;
        self
    }

    pub fn flush_wait(&self) -> Duration {
        Duration::from_millis(self.flush_wait_ms)
    }

    pub fn warm_load_wait(&self) -> Duration {
        Duration::from_millis(self.warm_load_wait_ms)
    }

    pub fn worker_keepalive(&self) -> Duration {
        Duration::from_millis(self.worker_keepalive_ms)
    }
}

impl fmt::Display for StashConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StashConfig {{ \
             dir: {}, \
             size_limit_bytes: {}, \
             flush_wait_ms: {}, \
             warm_load_wait_ms: {}, \
             worker_keepalive_ms: {}, \
             report_oversized: {} \
             }}",
            self.dir.display(),
            self.size_limit_bytes,
            self.flush_wait_ms,
            self.warm_load_wait_ms,
            self.worker_keepalive_ms,
            self.report_oversized,
        )
    }
}

/// Lightweight builder that produces a StashConfig.
#[derive(Clone, Debug)]
pub struct StashBuilder {
    cfg: StashConfig,
}

impl Default for StashBuilder {
    fn default() -> Self {
        // Start from env, then allow overrides.
        Self {
            cfg: StashConfig::from_env(),
        }
    }
}

impl StashBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a clean default (without reading env).
    pub fn from_default() -> Self {
        Self {
            cfg: StashConfig::default(),
        }
    }

    pub fn dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cfg.dir = dir.into();
        self
    }

    pub fn size_limit_bytes(mut self, n: usize) -> Self {
        self.cfg.size_limit_bytes = n;
        self
    }

    pub fn flush_wait_ms(mut self, ms: u64) -> Self {
        self.cfg.flush_wait_ms = ms;
        self
    }

    pub fn warm_load_wait_ms(mut self, ms: u64) -> Self {
        self.cfg.warm_load_wait_ms = ms;
        self
    }

    pub fn worker_keepalive_ms(mut self, ms: u64) -> Self {
        self.cfg.worker_keepalive_ms = ms;
        self
    }

    pub fn report_oversized(mut self, on: bool) -> Self {
        self.cfg.report_oversized = on;
        self
    }

    /// Finish the builder and obtain the configuration.
    pub fn build(self) -> StashConfig {
        self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let cfg = StashBuilder::from_default()
            .dir("/tmp/qs-x")
            .flush_wait_ms(10)
            .warm_load_wait_ms(20)
            .size_limit_bytes(1024)
            .report_oversized(false)
            .build();
        assert_eq!(cfg.dir, PathBuf::from("/tmp/qs-x"));
        assert_eq!(cfg.flush_wait(), Duration::from_millis(10));
        assert_eq!(cfg.warm_load_wait(), Duration::from_millis(20));
        assert_eq!(cfg.size_limit_bytes, 1024);
        assert!(!cfg.report_oversized);
        assert_eq!(cfg.worker_keepalive_ms, DEFAULT_WORKER_KEEPALIVE_MS);
        assert!(cfg.to_string().contains("flush_wait_ms: 10"));
    }

    #[test]
    fn env_flag_parsing() {
        assert!(env_flag(" YES "));
        assert!(env_flag("1"));
        assert!(!env_flag("0"));
        assert!(!env_flag("nope"));
    }
}
