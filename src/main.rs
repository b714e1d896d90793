use anyhow::Result;
use clap::Parser;

mod cli;
mod descriptor;
mod factory;
mod gcloud;
mod pipeline;
mod preflight;
mod progress;
mod repo;
mod stage;
mod storage;
mod terraform;
mod util;
mod vars;
mod workflow;

use cli::{Command, RootArgs};
use pipeline::RunAction;

fn main() -> Result<()> {
    // Diagnostics go to stderr so operator-facing output stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = RootArgs::parse();
    match args.command {
        Command::Configure(args) => workflow::run_configure(&args),
        Command::Create(args) => workflow::run_pipeline(RunAction::Apply, &args),
        Command::Destroy(args) => workflow::run_pipeline(RunAction::Destroy, &args),
    }
}
