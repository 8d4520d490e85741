//! Logging and observability infrastructure for conveyor
//!
//! Every phase transition is emitted as one structured `tracing` event carrying
//! `job_id`, `phase` and `outcome`; the subscriber supplies the timestamp and
//! decides the format.

use std::fmt::Display;
use std::io::IsTerminal;
use tracing::{Level, error, info, span, warn};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Output style for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, minimal
    #[default]
    Compact,
    /// Human-readable with targets and span close events
    Verbose,
    /// One JSON object per event
    Json,
}

/// Check if colored output should be used.
///
/// Returns true only if stderr is a terminal and `NO_COLOR` is not set.
fn use_color() -> bool {
    std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. Calling this twice returns an
/// error from the second call; the first subscriber stays installed.
pub fn init_tracing(format: LogFormat) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| match format {
            LogFormat::Verbose => EnvFilter::try_new("conveyor=debug,info"),
            LogFormat::Compact | LogFormat::Json => EnvFilter::try_new("conveyor=info,warn"),
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Verbose => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_ansi(use_color())
                        .with_target(true)
                        .with_span_events(FmtSpan::CLOSE)
                        .compact(),
                )
                .try_init()?;
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_ansi(use_color())
                        .with_target(false)
                        .compact(),
                )
                .try_init()?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .json()
                        .with_current_span(true),
                )
                .try_init()?;
        }
    }

    Ok(())
}

/// Span covering the whole execution of one job.
pub fn job_span(job_id: &str, subject: &str) -> tracing::Span {
    span!(
        Level::INFO,
        "job",
        job_id = %job_id,
        subject = %subject,
    )
}

/// Log the start of a phase.
pub fn log_phase_start(job_id: &str, phase: &str, required: bool) {
    info!(
        job_id = %job_id,
        phase = %phase,
        required,
        "Starting phase"
    );
}

/// Log the outcome of a phase.
///
/// Successful phases log at `info`; degraded (optional) failures at `warn`;
/// failures that abort the job at `error`.
pub fn log_phase_transition(
    job_id: &str,
    phase: &str,
    outcome: impl Display,
    duration_ms: u64,
    detail: Option<&str>,
    aborts_job: bool,
) {
    match detail {
        None => info!(
            job_id = %job_id,
            phase = %phase,
            outcome = %outcome,
            duration_ms,
            "Phase finished"
        ),
        Some(detail) if aborts_job => error!(
            job_id = %job_id,
            phase = %phase,
            outcome = %outcome,
            duration_ms,
            error = %detail,
            "Required phase failed, aborting job"
        ),
        Some(detail) => warn!(
            job_id = %job_id,
            phase = %phase,
            outcome = %outcome,
            duration_ms,
            error = %detail,
            "Optional phase failed, continuing"
        ),
    }
}

/// Log the terminal state of a job with its total elapsed time.
pub fn log_job_finished(job_id: &str, status: impl Display, elapsed_ms: u64) {
    info!(
        job_id = %job_id,
        status = %status,
        elapsed_ms,
        "Job finished"
    );
}
