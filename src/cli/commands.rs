//! Command implementations
//!
//! Each command returns the exit code it wants on success paths (a failed job
//! is not an error of the CLI) and an `anyhow` error for everything else;
//! `run.rs` turns those errors into user-facing output.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::info;

use crate::error::QueryError;
use crate::pipeline::{build_catalog, job_request, orchestrator_from_config};
use crate::{
    Config, ConveyorError, ExitCode, JobResults, JobStatus, JobStatusView, PhaseOutcome,
    UserFriendlyError,
};

/// Extra time granted on top of the summed phase timeouts when waiting.
const WAIT_SLACK: Duration = Duration::from_secs(5);

/// Final report of `conveyor run`.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub status: JobStatusView,
    /// Present only when the job completed
    pub results: Option<JobResults>,
}

impl RunReport {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self.status.status {
            JobStatus::Complete => ExitCode::SUCCESS,
            JobStatus::Error => ExitCode::JOB_FAILED,
            JobStatus::Queued | JobStatus::Running => ExitCode::NOT_READY,
        }
    }
}

/// Enqueue one job for `subject`, wait for it and print the outcome.
pub async fn execute_run_command(
    config: &Config,
    subject: &str,
    attrs: Vec<(String, String)>,
    wait_secs: Option<u64>,
    json: bool,
) -> Result<ExitCode> {
    let request = job_request(config, subject, attrs.into_iter().collect::<BTreeMap<_, _>>())
        .map_err(ConveyorError::from)?;
    let wait = wait_secs.map_or_else(
        || request.phases.iter().map(|p| p.timeout).sum::<Duration>() + WAIT_SLACK,
        Duration::from_secs,
    );

    let orchestrator = orchestrator_from_config(config)?;
    let id = orchestrator
        .enqueue(request)
        .map_err(ConveyorError::from)?;
    info!(job_id = %id, subject, wait_secs = wait.as_secs(), "Job enqueued");

    let reporter = orchestrator.reporter();
    let status = match reporter.wait_for_terminal(&id, wait).await {
        Ok(status) => status,
        Err(err @ QueryError::WaitTimeout { .. }) => {
            eprintln!("⚠ {}", err.user_message());
            reporter.get_status(&id).map_err(ConveyorError::from)?
        }
        Err(err) => return Err(ConveyorError::from(err).into()),
    };
    let results = match status.status {
        JobStatus::Complete => Some(reporter.get_results(&id).map_err(ConveyorError::from)?),
        _ => None,
    };
    orchestrator.shutdown();

    let report = RunReport { status, results };
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize run report")?
        );
    } else {
        print!("{}", render_run_report(&report));
    }
    Ok(report.exit_code())
}

/// Human-readable rendering of a run, finished or not.
#[must_use]
pub fn render_run_report(report: &RunReport) -> String {
    let status = &report.status;
    let mut out = String::new();

    match status.status {
        JobStatus::Complete => {
            let _ = writeln!(
                out,
                "✓ Job {} complete for '{}' in {}ms",
                status.id, status.subject, status.elapsed_ms
            );
        }
        JobStatus::Error => {
            let _ = writeln!(
                out,
                "✗ Job {} failed for '{}' after {}ms",
                status.id, status.subject, status.elapsed_ms
            );
            if let Some(error) = &status.error {
                let _ = writeln!(out, "  Error: {error}");
            }
        }
        JobStatus::Queued | JobStatus::Running => {
            let _ = writeln!(
                out,
                "… Job {} is still {} for '{}' after {}ms",
                status.id, status.status, status.subject, status.elapsed_ms
            );
            if let Some(phase) = &status.current_phase {
                let _ = writeln!(out, "  Current phase: {phase}");
            }
        }
    }
    let _ = writeln!(
        out,
        "  Progress: {}% ({}/{} phases)",
        status.progress, status.phases_done, status.phases_total
    );

    if let Some(results) = &report.results {
        for result in &results.phase_results {
            let marker = match result.outcome {
                PhaseOutcome::Success => "✓",
                PhaseOutcome::Warning => "⚠",
                PhaseOutcome::Failed => "✗",
            };
            let _ = write!(
                out,
                "  {marker} {} ({}, {}ms)",
                result.phase_name, result.outcome, result.duration_ms
            );
            if let Some(detail) = &result.error_detail {
                let _ = write!(out, ": {detail}");
            }
            out.push('\n');
        }
    }
    out
}

#[derive(Debug, Serialize)]
struct ValidateReport {
    valid: bool,
    config_file: Option<String>,
    phases: Vec<String>,
    producers: Vec<String>,
}

/// Check that every producer can be built and the pipeline is runnable.
pub fn execute_validate_command(config: &Config, json: bool) -> Result<ExitCode> {
    let specs = config.phase_specs().map_err(ConveyorError::from)?;
    let catalog = build_catalog(config).map_err(ConveyorError::from)?;

    let report = ValidateReport {
        valid: true,
        config_file: config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string()),
        phases: specs.iter().map(|s| s.name.clone()).collect(),
        producers: catalog.names().into_iter().map(str::to_string).collect(),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize validation report")?
        );
    } else {
        match &report.config_file {
            Some(path) => println!("✓ Configuration valid: {path}"),
            None => println!("✓ Configuration valid (defaults)"),
        }
        for spec in &specs {
            println!(
                "  {} → {} ({}, timeout {}s, weight {})",
                spec.name,
                spec.producer,
                if spec.required { "required" } else { "optional" },
                spec.timeout.as_secs(),
                spec.weight
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Print the effective configuration with the source of each value.
pub fn execute_config_command(config: &Config, json: bool) -> Result<ExitCode> {
    let effective = config.effective_config();

    if json {
        let value: BTreeMap<&str, serde_json::Value> = effective
            .iter()
            .map(|(key, (value, source))| {
                (
                    key.as_str(),
                    serde_json::json!({ "value": value, "source": source }),
                )
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&value).context("Failed to serialize configuration")?
        );
        return Ok(ExitCode::SUCCESS);
    }

    println!("Effective configuration:");
    if let Some(path) = &config.config_file {
        println!("  (from {})", path.display());
    }
    for (key, (value, source)) in &effective {
        println!("  {key} = {value}  [{source}]");
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobId, PhaseResult};
    use chrono::Utc;
    use conveyor_phase_api::{ErrorDetail, FailureKind};
    use conveyor_registry::JobError;
    use serde_json::json;

    fn view(status: JobStatus) -> JobStatusView {
        JobStatusView {
            id: JobId::from_raw("job_20250101_000000_acme_1"),
            subject: "Acme".into(),
            attributes: BTreeMap::new(),
            status,
            current_phase: None,
            progress: 100,
            error: None,
            phases_total: 2,
            phases_done: 2,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            elapsed_ms: 42,
        }
    }

    #[test]
    fn test_exit_code_follows_job_status() {
        let report = |status| RunReport {
            status: view(status),
            results: None,
        };
        assert_eq!(report(JobStatus::Complete).exit_code(), ExitCode::SUCCESS);
        assert_eq!(report(JobStatus::Error).exit_code(), ExitCode::JOB_FAILED);
        assert_eq!(report(JobStatus::Running).exit_code(), ExitCode::NOT_READY);
    }

    #[test]
    fn test_render_marks_warnings() {
        let status = view(JobStatus::Complete);
        let results = JobResults {
            id: status.id.clone(),
            subject: "Acme".into(),
            completed_at: None,
            elapsed_ms: 42,
            phase_results: vec![
                PhaseResult::success("research", json!("ok"), Duration::from_millis(7)),
                PhaseResult::failed(
                    "funding",
                    ErrorDetail::new(FailureKind::Provider, "lookup down"),
                    Duration::from_millis(3),
                )
                .into_warning(),
            ],
        };

        let text = render_run_report(&RunReport {
            status,
            results: Some(results),
        });
        assert!(text.contains("✓ Job job_20250101_000000_acme_1 complete"));
        assert!(text.contains("✓ research (success, 7ms)"));
        assert!(text.contains("⚠ funding (warning, 3ms): provider: lookup down"));
    }

    #[test]
    fn test_render_unfinished_job_shows_current_phase() {
        let mut status = view(JobStatus::Running);
        status.current_phase = Some("funding".into());
        status.progress = 40;
        status.phases_done = 1;

        let report = RunReport {
            status,
            results: None,
        };
        let text = render_run_report(&report);
        assert!(text.contains("… Job job_20250101_000000_acme_1 is still running for 'Acme'"));
        assert!(text.contains("  Current phase: funding"));
        assert!(text.contains("  Progress: 40% (1/2 phases)"));
        assert_eq!(report.exit_code(), ExitCode::NOT_READY);
    }

    #[test]
    fn test_render_failed_job_shows_error() {
        let mut status = view(JobStatus::Error);
        status.error = Some(JobError::in_phase(
            "research",
            &ErrorDetail::new(FailureKind::Timeout, "timed out"),
        ));
        let text = render_run_report(&RunReport {
            status,
            results: None,
        });
        assert!(text.contains("✗ Job"));
        assert!(text.contains("phase 'research' failed"));
    }
}
