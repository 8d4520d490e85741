//! Command-line interface for conveyor
//!
//! ## Module Structure
//!
//! - `args`: CLI argument definitions and parsing structures (clap)
//! - `run`: Main entry point and command dispatch
//! - `commands`: Command implementations and output rendering

pub mod args;
mod commands;
mod run;

pub use args::{Cli, Commands, build_cli, parse_key_val};
pub use commands::{RunReport, render_run_report};
pub use run::{cli_args, run};

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_run_parses_attributes_and_globals() {
        let cli = Cli::try_parse_from([
            "conveyor",
            "--poll-interval",
            "2",
            "run",
            "Acme Corp",
            "--attr",
            "industry=logistics",
            "--attr",
            "location=Berlin=Mitte",
            "--json",
        ])
        .unwrap();

        let args = cli_args(&cli);
        assert_eq!(args.poll_interval_secs, Some(2));
        assert_eq!(args.max_concurrent_jobs, None);

        match cli.command {
            Commands::Run {
                subject,
                attrs,
                wait_secs,
                json,
            } => {
                assert_eq!(subject, "Acme Corp");
                assert_eq!(
                    attrs,
                    vec![
                        ("industry".to_string(), "logistics".to_string()),
                        ("location".to_string(), "Berlin=Mitte".to_string()),
                    ]
                );
                assert_eq!(wait_secs, None);
                assert!(json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_attribute_requires_key_and_equals() {
        assert!(parse_key_val("industry").is_err());
        assert!(parse_key_val("=x").is_err());
        assert_eq!(
            parse_key_val("k=").unwrap(),
            ("k".to_string(), String::new())
        );
    }
}
