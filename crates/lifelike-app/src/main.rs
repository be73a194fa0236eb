mod cli;
mod commands;
mod report;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    init_tracing();
    let cli = cli::Cli::parse();
    commands::run(cli)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
