//! CLI argument definitions (clap)

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// conveyor - multi-phase job pipeline runner
#[derive(Parser, Debug)]
#[command(name = "conveyor")]
#[command(about = "Run a configured multi-phase pipeline for a subject and report its status")]
#[command(long_about = r#"
conveyor runs a pipeline of phases for one subject. Each phase delegates its
work to a producer: a subprocess, or a remote provider that is submitted a
task and polled until it finishes. Required phases abort the job when they
fail; optional phases are recorded as warnings and the job continues.

EXAMPLES:
  # Run the configured pipeline for a company
  conveyor run "Acme Corp" --attr industry=logistics --attr location=Berlin

  # Same, printing the final status and results as JSON
  conveyor run "Acme Corp" --json

  # Check the configuration without running anything
  conveyor validate

  # Show effective configuration and where each value came from
  conveyor config

CONFIGURATION:
  Configuration is loaded with precedence: CLI flags > config file > defaults.
  The file is --config, else $CONVEYOR_CONFIG, else the first
  .conveyor/config.toml found searching upward from the current directory.

EXIT CODES:
  0 job completed, 1 internal error, 2 invalid arguments or configuration,
  3 job failed, 4 job did not finish in time
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: compact, verbose or json
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Maximum number of jobs running at once
    #[arg(long, global = true)]
    pub max_concurrent_jobs: Option<usize>,

    /// Number of finished jobs kept in memory
    #[arg(long, global = true)]
    pub history_limit: Option<usize>,

    /// Default phase timeout in seconds
    #[arg(long, global = true)]
    pub phase_timeout: Option<u64>,

    /// Delay between task status queries in seconds
    #[arg(long, global = true)]
    pub poll_interval: Option<u64>,

    /// Ceiling on polling one provider task in seconds
    #[arg(long, global = true)]
    pub poll_max_wait: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the configured pipeline for a subject and wait for it to finish
    Run {
        /// What the pipeline works on (for example a company name)
        subject: String,

        /// Job attribute passed to every producer (repeatable)
        #[arg(long = "attr", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        attrs: Vec<(String, String)>,

        /// Give up waiting after this many seconds (default: sum of phase timeouts)
        #[arg(long)]
        wait_secs: Option<u64>,

        /// Print the final status and results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load and validate the configuration and producers
    Validate {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show effective configuration with source attribution
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Parse a `KEY=VALUE` pair.
pub fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("attribute key must not be empty in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Build the clap command, for completions and tests.
#[must_use]
pub fn build_cli() -> clap::Command {
    <Cli as clap::CommandFactory>::command()
}
