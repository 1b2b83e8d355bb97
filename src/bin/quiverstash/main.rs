use anyhow::Result;
use clap::Parser;
use env_logger::{Builder, Env};
use log::error;

mod cli;
mod util;
mod cmd_list;
mod cmd_show;
mod cmd_clear;
mod cmd_stats;

fn init_logger() {
    // Уровень берём из RUST_LOG, иначе дефолт — info.
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        error!("{:?}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    match cli.cmd {
        cli::Cmd::List { dir, json } =>
            cmd_list::exec(util::store_dir(dir), json),

        cli::Cmd::Show { dir, key, json, sizes } =>
            cmd_show::exec(util::store_dir(dir), key, json, sizes),

        cli::Cmd::Clear { dir, key, all } =>
            cmd_clear::exec(util::store_dir(dir), key, all),

        cli::Cmd::Stats { dir, json } =>
            cmd_stats::exec(util::store_dir(dir), json),
    }
}
