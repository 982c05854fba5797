//! main.rs — ribosift entry point

mod align;
mod cli;
mod error;
mod index;
mod pipeline;
mod reads;
mod refs;
mod report;
mod seq;

use clap::Parser;

use cli::{Cli, RunConfig};

fn main() {
    let cli = Cli::parse();

    let filter = match cli.dbg_level {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_secs()
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> error::Result<()> {
    let cfg = RunConfig::from_cli(cli)?;
    pipeline::run(&cfg)
}
