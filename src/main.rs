mod cli;
mod heuristics;
mod invoke;
mod reconcile;
mod refine;
mod rules;
mod schema;
mod templates;
mod util;
mod workflow;

use clap::Parser;
use cli::{Command, RootArgs};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "REFINER_LOG";

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_logging(args.verbose);

    let outcome = match args.command {
        Command::Refine(args) => workflow::run_refine(args),
        Command::Analyze(args) => workflow::run_analyze(args),
        Command::Rules(args) => workflow::run_rules(args),
    };
    match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
