use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use strum::{AsRefStr, EnumString};

/// Process-wide sequence appended to generated job ids.
static JOB_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Maximum number of characters taken from the subject when building an id.
const MAX_SLUG_LEN: usize = 32;

/// Opaque, unique identifier for a job.
///
/// Generated ids look like `job_20260114_093015_acme_corp_0007`: creation
/// timestamp, a slug of the subject, and a process-wide sequence number.
/// Callers must treat the value as opaque; only equality is meaningful.
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use conveyor_utils::types::JobId;
///
/// let a = JobId::generate("Acme Corp", Utc::now());
/// let b = JobId::generate("Acme Corp", Utc::now());
/// assert_ne!(a, b);
/// assert!(a.as_str().starts_with("job_"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Allocate a fresh id for a job about `subject` created at `now`.
    #[must_use]
    pub fn generate(subject: &str, now: DateTime<Utc>) -> Self {
        let seq = JOB_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let slug = slugify(subject);
        let stamp = now.format("%Y%m%d_%H%M%S");
        if slug.is_empty() {
            Self(format!("job_{stamp}_{seq:04}"))
        } else {
            Self(format!("job_{stamp}_{slug}_{seq:04}"))
        }
    }

    /// Wrap an existing id string (e.g. one received from a caller).
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(raw: &str) -> Self {
        Self::from_raw(raw)
    }
}

/// Lowercase, underscore-separated rendition of a subject for use in ids.
#[must_use]
pub fn slugify(subject: &str) -> String {
    let mut slug = String::with_capacity(subject.len().min(MAX_SLUG_LEN));
    let mut pending_sep = false;
    for ch in subject.trim().chars() {
        if !ch.is_ascii_alphanumeric() {
            pending_sep = true;
            continue;
        }
        let needs_sep = pending_sep && !slug.is_empty();
        if slug.len() + usize::from(needs_sep) + 1 > MAX_SLUG_LEN {
            break;
        }
        if needs_sep {
            slug.push('_');
        }
        pending_sep = false;
        slug.push(ch.to_ascii_lowercase());
    }
    slug
}

/// Lifecycle state of a job.
///
/// ```text
/// Queued → Running → Complete
///                  ↘ Error
/// ```
///
/// `Queued` may also go straight to `Error` when a job is abandoned before
/// its first phase starts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Complete,
    Error,
}

impl JobStatus {
    /// Terminal states admit no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Whether `self → next` is an edge of the job state machine.
    ///
    /// `Running → Running` is allowed; it is how phase changes are recorded.
    #[must_use]
    pub const fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Queued, Self::Error)
                | (Self::Running, Self::Running)
                | (Self::Running, Self::Complete)
                | (Self::Running, Self::Error)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Where an effective configuration value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Cli,
    Env,
    Config,
    Programmatic,
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Cli => "cli",
            Self::Env => "env",
            Self::Config => "config",
            Self::Programmatic => "programmatic",
            Self::Default => "default",
        };
        f.write_str(label)
    }
}
