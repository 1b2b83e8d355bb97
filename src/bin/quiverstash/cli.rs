use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Инспекция каталога QuiverStash (записи снапшотов на диске)
#[derive(Parser, Debug)]
#[command(name = "quiverstash", version, about = "QuiverStash store inspector")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// List persisted records (token, size, validity)
    List {
        /// Store directory (default: QS_DIR or <tmp>/quiverstash)
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Decode and print one record
    Show {
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Record key (the token)
        #[arg(long)]
        key: String,
        #[arg(long, default_value_t = false)]
        json: bool,
        /// Print the per-key size breakdown instead of the values
        #[arg(long, default_value_t = false)]
        sizes: bool,
    },
    /// Delete one record (--key) or every record (--all)
    Clear {
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long, conflicts_with = "all")]
        key: Option<String>,
        #[arg(long, default_value_t = false)]
        all: bool,
    },
    /// Aggregate numbers for the store directory
    Stats {
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}
