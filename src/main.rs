mod capability;
mod cli;
mod commands;
mod config;
mod header;
mod model;
mod pdf;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Links(args) => commands::links::run(args),
        Commands::Admit(args) => commands::admit::run(args),
        Commands::Sections(args) => commands::sections::run(args),
        Commands::Definitions(args) => commands::definitions::run(args),
        Commands::Clean(args) => commands::clean::run(args),
        Commands::Merge(args) => commands::merge::run(args),
        Commands::Pipeline => commands::pipeline::run(),
        Commands::Status => commands::status::run(),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
