use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::types::JobStatus;

/// Library-level error type for conveyor.
///
/// `ConveyorError` is what the public entry points return when something goes
/// wrong outside of a phase. Phase-local failures (provider errors, timeouts)
/// never surface here: they are folded into the job's phase results.
///
/// | Category | Description |
/// |----------|-------------|
/// | `Config` | Configuration file or CLI argument errors |
/// | `Validation` | Malformed enqueue request |
/// | `Registry` | Unknown job or illegal state change |
/// | `Query` | Status query on a missing or unfinished job |
///
/// Use [`crate::exit_codes::ExitCode::from`] to map an error to a CLI exit code
/// and [`UserFriendlyError`] for end-user output.
#[derive(Error, Debug)]
pub enum ConveyorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid job request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Job registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Status query error: {0}")]
    Query(#[from] QueryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for providing user-friendly error reporting with context and suggestions
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping similar errors
    fn category(&self) -> ErrorCategory;
}

/// Categories of errors for better organization and handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Validation,
    JobState,
    Query,
    Provider,
    FileSystem,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Validation => write!(f, "Validation"),
            Self::JobState => write!(f, "Job State"),
            Self::Query => write!(f, "Query"),
            Self::Provider => write!(f, "Provider"),
            Self::FileSystem => write!(f, "File System"),
        }
    }
}

impl ConveyorError {
    /// Render the error for a terminal, including context and suggestions.
    #[must_use]
    pub fn display_for_user(&self) -> String {
        let mut out = format!("[{}] {}", self.category(), self.user_message());
        if let Some(ctx) = self.context() {
            out.push_str("\n\n");
            out.push_str(&ctx);
        }
        let suggestions = self.suggestions();
        if !suggestions.is_empty() {
            out.push_str("\n\nSuggestions:");
            for s in suggestions {
                out.push_str("\n  - ");
                out.push_str(&s);
            }
        }
        out
    }
}

impl UserFriendlyError for ConveyorError {
    fn user_message(&self) -> String {
        match self {
            Self::Config(e) => e.user_message(),
            Self::Validation(e) => format!("The job request was rejected: {e}"),
            Self::Registry(e) => e.user_message(),
            Self::Query(e) => e.user_message(),
            Self::Io(e) => format!("File system operation failed: {e}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Config(e) => e.context(),
            Self::Registry(e) => e.context(),
            Self::Query(e) => e.context(),
            Self::Validation(_) | Self::Io(_) => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Config(e) => e.suggestions(),
            Self::Validation(e) => e.suggestions(),
            Self::Registry(e) => e.suggestions(),
            Self::Query(e) => e.suggestions(),
            Self::Io(_) => vec!["Check file permissions and available disk space".to_string()],
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Registry(_) => ErrorCategory::JobState,
            Self::Query(_) => ErrorCategory::Query,
            Self::Io(_) => ErrorCategory::FileSystem,
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file {path}: {reason}")]
    InvalidFile { path: String, reason: String },

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Phase {phase} references unknown producer '{producer}'")]
    UnknownProducer { phase: String, producer: String },
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidFile { path, reason } => {
                format!("Configuration file {path} could not be parsed: {reason}")
            }
            Self::NotFound { path } => format!("Configuration file not found: {path}"),
            Self::MissingRequired(key) => format!("Required configuration '{key}' is missing"),
            Self::InvalidValue { key, value } => {
                format!("Configuration value for '{key}' is invalid: {value}")
            }
            Self::UnknownProducer { phase, producer } => {
                format!("Phase '{phase}' uses producer '{producer}', which is not defined")
            }
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::NotFound { .. } => Some(
                "Configuration is read from --config, $CONVEYOR_CONFIG, or .conveyor/config.toml"
                    .to_string(),
            ),
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidFile { .. } => vec![
                "Check the TOML syntax of the configuration file".to_string(),
                "Run `conveyor validate` to see the effective configuration".to_string(),
            ],
            Self::NotFound { .. } => vec![
                "Pass an explicit path with --config".to_string(),
                "Create .conveyor/config.toml in the project root".to_string(),
            ],
            Self::MissingRequired(key) => vec![format!("Add '{key}' to the configuration")],
            Self::InvalidValue { key, .. } => {
                vec![format!("Adjust '{key}' to a value within the documented range")]
            }
            Self::UnknownProducer { producer, .. } => {
                vec![format!("Define a [producers.{producer}] section")]
            }
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

/// Malformed enqueue request, reported synchronously to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("subject must not be empty")]
    EmptySubject,

    #[error("at least one phase is required")]
    EmptyPipeline,

    #[error("phase names must not be empty (position {index})")]
    EmptyPhaseName { index: usize },

    #[error("duplicate phase name '{name}'")]
    DuplicatePhase { name: String },

    #[error("phase '{phase}' uses unknown producer '{producer}'")]
    UnknownProducer { phase: String, producer: String },

    #[error("phase '{phase}' must have a non-zero timeout")]
    ZeroTimeout { phase: String },

    #[error("phase '{phase}' weight {weight} exceeds 100")]
    WeightOutOfRange { phase: String, weight: u8 },
}

impl ValidationError {
    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::EmptySubject => vec!["Provide the subject the pipeline should work on".into()],
            Self::EmptyPipeline => vec!["Declare at least one phase".into()],
            Self::EmptyPhaseName { .. } => vec!["Give every phase a name".into()],
            Self::DuplicatePhase { .. } => vec!["Phase names must be unique within a job".into()],
            Self::UnknownProducer { producer, .. } => {
                vec![format!("Register a producer named '{producer}'")]
            }
            Self::ZeroTimeout { .. } => vec!["Set a positive timeout for the phase".into()],
            Self::WeightOutOfRange { .. } => vec!["Use a weight between 0 and 100".into()],
        }
    }
}

/// Errors raised by the job registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("job {id} not found")]
    NotFound { id: String },

    #[error("invalid transition for job {id} (status {from}): {reason}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        reason: String,
    },
}

impl UserFriendlyError for RegistryError {
    fn user_message(&self) -> String {
        match self {
            Self::NotFound { id } => format!("No job with id {id}"),
            Self::InvalidTransition { id, from, reason } => {
                format!("Job {id} cannot change state from {from}: {reason}")
            }
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::InvalidTransition { from, .. } if from.is_terminal() => {
                Some("Finished jobs are immutable.".to_string())
            }
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::NotFound { .. } => {
                vec!["Use the job id returned when the job was enqueued".into()]
            }
            Self::InvalidTransition { .. } => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::JobState
    }
}

/// Query-time conditions reported by the status surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("job {id} not found")]
    NotFound { id: String },

    #[error("job {id} is not complete (status {status})")]
    NotReady { id: String, status: JobStatus },

    #[error("timed out after {waited:?} waiting for job {id} to finish")]
    WaitTimeout { id: String, waited: Duration },
}

impl UserFriendlyError for QueryError {
    fn user_message(&self) -> String {
        match self {
            Self::NotFound { id } => format!("No job with id {id}"),
            Self::NotReady { id, status } => {
                format!("Results for job {id} are not available yet (status: {status})")
            }
            Self::WaitTimeout { id, waited } => {
                format!("Job {id} did not finish within {}s", waited.as_secs())
            }
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::NotReady { status, .. } if *status == JobStatus::Error => {
                Some("The job aborted; its status carries the error detail.".to_string())
            }
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::NotFound { .. } => Vec::new(),
            Self::NotReady { .. } => vec!["Poll the job status until it is complete".into()],
            Self::WaitTimeout { .. } => vec!["Increase the wait timeout".into()],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Query
    }
}

impl From<RegistryError> for QueryError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { id } | RegistryError::InvalidTransition { id, .. } => {
                Self::NotFound { id }
            }
        }
    }
}

/// Failures talking to an external async provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Network-level failure (connect, reset, DNS)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider refused the request outright (bad input)
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Provider authentication failure (401, 403, missing API key)
    #[error("Provider authentication error: {0}")]
    Auth(String),

    /// Provider quota/rate limit exceeded (429)
    #[error("Provider quota exceeded: {0}")]
    Quota(String),

    /// Provider service outage (5xx)
    #[error("Provider outage: {0}")]
    Outage(String),

    /// Response could not be understood
    #[error("Malformed provider response: {0}")]
    Malformed(String),

    /// A single provider call timed out
    #[error("Provider call timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Provider client is not configured correctly
    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),
}

impl ProviderError {
    /// Whether retrying the same call later may succeed.
    ///
    /// Status queries that fail transiently are retried by the poller; any
    /// other failure is final for the call that produced it.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Outage(_) | Self::Malformed(_) | Self::Timeout { .. }
        )
    }
}

/// Errors from the submit/poll cycle of an async task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("task submission failed: {0}")]
    Submit(ProviderError),

    #[error("task {task_id} did not finish within {waited:?} ({polls} polls)")]
    Timeout {
        task_id: String,
        waited: Duration,
        polls: u32,
    },

    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTaskTransition {
        task_id: String,
        from: String,
        to: String,
    },
}

/// Classification of a failed phase, carried in its error detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Provider,
    Rejected,
    Timeout,
    TaskFailed,
    Process,
    InvalidOutput,
    Panicked,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Provider => "provider",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
            Self::TaskFailed => "task_failed",
            Self::Process => "process",
            Self::InvalidOutput => "invalid_output",
            Self::Panicked => "panicked",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Failure reported by a producer.
///
/// Producers return this instead of panicking or propagating transport
/// errors; the phase runner turns it into a failed phase result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProducerError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("provider task {task_id} failed: {reason}")]
    TaskFailed { task_id: String, reason: String },

    #[error("timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("process exited with {}: {stderr_tail}", exit_label(.code))]
    Process {
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("invalid output: {0}")]
    InvalidOutput(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "signal".to_string(),
    }
}

impl ProducerError {
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Provider(ProviderError::Rejected(_) | ProviderError::Auth(_)) => {
                FailureKind::Rejected
            }
            Self::Provider(ProviderError::Timeout { .. }) | Self::Timeout { .. } => {
                FailureKind::Timeout
            }
            Self::Provider(_) => FailureKind::Provider,
            Self::TaskFailed { .. } => FailureKind::TaskFailed,
            Self::Process { .. } => FailureKind::Process,
            Self::InvalidOutput(_) => FailureKind::InvalidOutput,
        }
    }
}

impl From<PollError> for ProducerError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Submit(provider) => Self::Provider(provider),
            PollError::Timeout { waited, .. } => Self::Timeout { duration: waited },
            PollError::InvalidTaskTransition { .. } => Self::InvalidOutput(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Transport("reset".into()).is_transient());
        assert!(ProviderError::Malformed("bad json".into()).is_transient());
        assert!(
            ProviderError::Timeout {
                duration: Duration::from_secs(1)
            }
            .is_transient()
        );
        assert!(!ProviderError::Auth("401".into()).is_transient());
        assert!(!ProviderError::Rejected("bad input".into()).is_transient());
    }

    #[test]
    fn test_producer_error_kinds() {
        assert_eq!(
            ProducerError::from(ProviderError::Auth("nope".into())).kind(),
            FailureKind::Rejected
        );
        assert_eq!(
            ProducerError::from(PollError::Timeout {
                task_id: "T2".into(),
                waited: Duration::from_secs(30),
                polls: 6,
            })
            .kind(),
            FailureKind::Timeout
        );
        assert_eq!(
            ProducerError::TaskFailed {
                task_id: "T1".into(),
                reason: "nsfw".into()
            }
            .kind(),
            FailureKind::TaskFailed
        );
    }

    #[test]
    fn test_process_error_message() {
        let err = ProducerError::Process {
            code: Some(2),
            stderr_tail: "boom".into(),
        };
        assert_eq!(err.to_string(), "process exited with code 2: boom");
        let killed = ProducerError::Process {
            code: None,
            stderr_tail: String::new(),
        };
        assert!(killed.to_string().contains("signal"));
    }

    #[test]
    fn test_display_for_user_includes_suggestions() {
        let err = ConveyorError::Query(QueryError::NotReady {
            id: "job_1".into(),
            status: JobStatus::Running,
        });
        let text = err.display_for_user();
        assert!(text.starts_with("[Query]"));
        assert!(text.contains("Suggestions:"));
    }

    #[test]
    fn test_registry_not_found_maps_to_query_not_found() {
        let err: QueryError = RegistryError::NotFound { id: "x".into() }.into();
        assert_eq!(err, QueryError::NotFound { id: "x".into() });
    }
}
