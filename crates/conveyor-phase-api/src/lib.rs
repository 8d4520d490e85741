//! Phase contract for conveyor pipelines
//!
//! This crate defines what a phase is, what it produces, and the [`Producer`]
//! capability a phase delegates its work to.
//!
//! # Purpose
//!
//! The engine only ever sees the types in this crate. Whether a producer runs
//! a subprocess, calls a library, or submits work to a remote provider and
//! polls for it is invisible to the orchestration layer: it receives a
//! payload or a typed [`ProducerError`] and applies one failure policy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use strum::{AsRefStr, EnumString};

pub use conveyor_utils::error::{FailureKind, ProducerError};
pub use conveyor_utils::types::JobId;

/// Opaque output of a phase.
pub type Payload = serde_json::Value;

/// Default per-phase timeout when the caller does not set one (10 minutes)
pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(600);

/// How a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PhaseOutcome {
    /// The producer returned a payload
    Success,
    /// An optional phase failed; the job continued without its output
    Warning,
    /// The phase failed
    Failed,
}

impl fmt::Display for PhaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Structured, human-readable reason a phase did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: FailureKind,
    pub message: String,
}

impl ErrorDetail {
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<&ProducerError> for ErrorDetail {
    fn from(err: &ProducerError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Result of executing one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase_name: String,
    pub outcome: PhaseOutcome,
    /// Producer output; `null` for failed phases
    pub payload: Payload,
    pub error_detail: Option<ErrorDetail>,
    /// Wall-clock time spent in the producer
    pub duration_ms: u64,
}

impl PhaseResult {
    #[must_use]
    pub fn success(phase_name: impl Into<String>, payload: Payload, duration: Duration) -> Self {
        Self {
            phase_name: phase_name.into(),
            outcome: PhaseOutcome::Success,
            payload,
            error_detail: None,
            duration_ms: duration_ms(duration),
        }
    }

    #[must_use]
    pub fn failed(phase_name: impl Into<String>, detail: ErrorDetail, duration: Duration) -> Self {
        Self {
            phase_name: phase_name.into(),
            outcome: PhaseOutcome::Failed,
            payload: Payload::Null,
            error_detail: Some(detail),
            duration_ms: duration_ms(duration),
        }
    }

    /// Downgrade a failed result to a warning, keeping its error detail.
    #[must_use]
    pub fn into_warning(mut self) -> Self {
        if self.outcome == PhaseOutcome::Failed {
            self.outcome = PhaseOutcome::Warning;
        }
        self
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == PhaseOutcome::Success
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Declaration of one phase in a pipeline, supplied by the caller at enqueue time.
///
/// # Example
///
/// ```rust
/// use conveyor_phase_api::PhaseSpec;
/// use std::time::Duration;
///
/// let research = PhaseSpec::required("research")
///     .with_weight(40)
///     .with_timeout(Duration::from_secs(900));
/// let funding = PhaseSpec::optional("funding").with_producer("funding-lookup");
///
/// assert!(research.required);
/// assert_eq!(funding.producer, "funding-lookup");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSpec {
    /// Unique name of the phase within the job
    pub name: String,
    /// Catalog key of the producer; defaults to the phase name
    pub producer: String,
    /// Whether a failure aborts the job (true) or only degrades it (false)
    pub required: bool,
    /// Upper bound on the producer call
    pub timeout: Duration,
    /// Progress points credited when the phase finishes
    pub weight: u8,
}

impl PhaseSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, required: bool) -> Self {
        let name = name.into();
        Self {
            producer: name.clone(),
            name,
            required,
            timeout: DEFAULT_PHASE_TIMEOUT,
            weight: 0,
        }
    }

    /// A phase whose failure aborts the job.
    #[must_use]
    pub fn required(name: impl Into<String>) -> Self {
        Self::new(name, true)
    }

    /// A phase whose failure is recorded as a warning.
    #[must_use]
    pub fn optional(name: impl Into<String>) -> Self {
        Self::new(name, false)
    }

    #[must_use]
    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = producer.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_weight(mut self, weight: u8) -> Self {
        self.weight = weight;
        self
    }
}

/// Everything a producer may look at while running a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseContext {
    pub job_id: JobId,
    pub subject: String,
    /// Free-form job attributes supplied at enqueue time
    pub attributes: BTreeMap<String, String>,
    /// Name of the phase being run
    pub phase: String,
    /// Results of the phases that already ran, in order
    pub prior_results: Vec<PhaseResult>,
}

impl PhaseContext {
    /// Result of an earlier phase, if it ran.
    #[must_use]
    pub fn prior(&self, phase: &str) -> Option<&PhaseResult> {
        self.prior_results.iter().find(|r| r.phase_name == phase)
    }

    /// Payload of an earlier phase, only if it succeeded.
    #[must_use]
    pub fn prior_payload(&self, phase: &str) -> Option<&Payload> {
        self.prior(phase)
            .filter(|r| r.is_success())
            .map(|r| &r.payload)
    }
}

/// The capability a phase delegates its actual work to.
///
/// Implementations must not panic on provider failures; they return a
/// [`ProducerError`] instead. The engine bounds every call with the phase's
/// timeout and cancels the future when it expires.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn produce(&self, ctx: &PhaseContext) -> Result<Payload, ProducerError>;
}

/// Adapter turning an async closure into a [`Producer`].
///
/// ```rust
/// use conveyor_phase_api::{FnProducer, Producer};
/// use serde_json::json;
///
/// let echo = FnProducer::new(|ctx| async move { Ok(json!({ "subject": ctx.subject })) });
/// # let _ = &echo as &dyn Producer;
/// ```
pub struct FnProducer<F> {
    func: F,
}

impl<F> FnProducer<F> {
    pub fn new<Fut>(func: F) -> Self
    where
        F: Fn(PhaseContext) -> Fut + Send + Sync,
        Fut: Future<Output = Result<Payload, ProducerError>> + Send,
    {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> Producer for FnProducer<F>
where
    F: Fn(PhaseContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload, ProducerError>> + Send,
{
    async fn produce(&self, ctx: &PhaseContext) -> Result<Payload, ProducerError> {
        (self.func)(ctx.clone()).await
    }
}

/// Named producers available to phases.
#[derive(Clone, Default)]
pub struct ProducerCatalog {
    producers: HashMap<String, Arc<dyn Producer>>,
}

impl ProducerCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `producer` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, producer: Arc<dyn Producer>) {
        self.producers.insert(name.into(), producer);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, producer: Arc<dyn Producer>) -> Self {
        self.register(name, producer);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Producer>> {
        self.producers.get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.producers.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.producers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ProducerCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerCatalog")
            .field("producers", &self.names())
            .finish()
    }
}
