mod cli;
mod config;
mod output;
mod scenario;

use std::process;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{Level, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::{Args, Commands};
use crate::output::EventPrinter;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("Application error: {e:#}");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = config::load(args.config.as_deref())?;

    match args.command {
        Commands::Simulate {
            scenario,
            json,
            duration,
        } => {
            let duration = duration.map(Duration::from_secs);
            scenario::run(scenario, config, duration, EventPrinter::new(json)).await
        }
        Commands::Config => {
            print!("{}", config::show(&config)?);
            Ok(())
        }
    }
}

/// Logs go to stderr so event output on stdout stays machine-readable.
fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("tether_engine=debug,tether=debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(verbose),
        )
        .init();
}
