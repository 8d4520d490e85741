//! CLI entry point and dispatch logic
//!
//! This module owns the `run()` function which:
//! - Parses CLI arguments
//! - Builds CliArgs and discovers Config
//! - Installs the tracing subscriber and creates the tokio runtime
//! - Dispatches to command handlers
//! - Handles all error output

use clap::Parser;

use super::args::{Cli, Commands};
use super::commands;
use crate::logging::init_tracing;
use crate::{CliArgs, Config, ConveyorError, ExitCode};

/// Main CLI execution function.
///
/// Handles ALL output including errors and returns `Result<(), ExitCode>`.
/// main.rs only calls `std::process::exit(code.as_i32())` on error; it does
/// NOT print.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();
    let cli_args = cli_args(&cli);

    let config = match Config::discover(&cli_args) {
        Ok(config) => config,
        Err(err) => {
            let err = ConveyorError::from(err);
            eprintln!("✗ {}", err.display_for_user());
            return Err(ExitCode::from(&err));
        }
    };

    // A subscriber may already be installed when embedded; keep it.
    let _ = init_tracing(config.log_format());

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to create async runtime: {e}");
            return Err(ExitCode::INTERNAL);
        }
    };

    let result = rt.block_on(async {
        match cli.command {
            Commands::Run {
                subject,
                attrs,
                wait_secs,
                json,
            } => commands::execute_run_command(&config, &subject, attrs, wait_secs, json).await,
            Commands::Validate { json } => commands::execute_validate_command(&config, json),
            Commands::Config { json } => commands::execute_config_command(&config, json),
        }
    });

    match result {
        Ok(code) if code == ExitCode::SUCCESS => Ok(()),
        Ok(code) => Err(code),
        Err(err) => match err.downcast_ref::<ConveyorError>() {
            Some(conveyor_err) => {
                eprintln!("✗ {}", conveyor_err.display_for_user());
                Err(ExitCode::from(conveyor_err))
            }
            None => {
                eprintln!("✗ Unexpected error: {err:#}");
                Err(ExitCode::INTERNAL)
            }
        },
    }
}

/// Map parsed flags onto the configuration overrides.
#[must_use]
pub fn cli_args(cli: &Cli) -> CliArgs {
    CliArgs {
        config_path: cli.config.clone(),
        max_concurrent_jobs: cli.max_concurrent_jobs,
        history_limit: cli.history_limit,
        phase_timeout_secs: cli.phase_timeout,
        poll_interval_secs: cli.poll_interval,
        poll_max_wait_secs: cli.poll_max_wait,
        log_format: cli.log_format.clone(),
    }
}
