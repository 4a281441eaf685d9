use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "tether",
    version,
    about = "Drive the playback resilience engine through scripted failure scenarios",
    long_about = None
)]
pub struct Args {
    /// Engine configuration file (TOML)
    #[arg(short, long, global = true, env = "TETHER_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a built-in scenario against a scripted pipeline and print session events
    Simulate {
        #[arg(value_enum)]
        scenario: Scenario,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,

        /// Stop after this many seconds instead of the scenario's default
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,
    },

    /// Print the effective engine configuration as TOML
    Config,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scenario {
    /// Primary and secondary CDNs fail, the third one plays
    FlakyCdn,
    /// Buffer stops growing; watchdog soft-recovers, then reconnects
    StalledBuffer,
    /// Frequent rebuffering escalates the buffer level
    RebufferStorm,
    /// A VOD URL returns an HTTP error; it is surfaced, never retried
    VodError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_simulate() {
        let args = Args::parse_from(["tether", "simulate", "flaky-cdn", "--json", "-v"]);
        assert!(args.verbose);
        match args.command {
            Commands::Simulate {
                scenario,
                json,
                duration,
            } => {
                assert_eq!(scenario, Scenario::FlakyCdn);
                assert!(json);
                assert_eq!(duration, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
