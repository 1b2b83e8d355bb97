use std::path::PathBuf;

use QuiverStash::StashConfig;

/// Explicit --dir, else the configured default (QS_DIR).
pub fn store_dir(arg: Option<PathBuf>) -> PathBuf {
    arg.unwrap_or_else(|| StashConfig::from_env().dir)
}
