//! Job orchestration.
//!
//! The [`Orchestrator`] accepts job requests, validates them synchronously,
//! and drives each accepted job through its phases on a spawned tokio task.
//! Phases of one job run strictly one after another; different jobs run
//! concurrently up to `max_concurrent_jobs`.
//!
//! Per phase:
//!
//! 1. the job enters the phase (`EnterPhase`)
//! 2. the [`PhaseRunner`] executes it and returns a [`PhaseResult`]
//! 3. a success is recorded and its weight credited to progress
//! 4. a failed required phase aborts the job; nothing after it runs
//! 5. a failed optional phase is recorded as a warning and the job continues
//!
//! After the last phase the job is completed.

use chrono::Utc;
use conveyor_phase_api::{FailureKind, PhaseOutcome, PhaseResult, PhaseSpec, ProducerCatalog};
use conveyor_registry::{Job, JobError, JobMutation, JobRegistry, PlannedPhase};
use conveyor_status::StatusReporter;
use conveyor_utils::error::ValidationError;
use conveyor_utils::logging::{job_span, log_job_finished, log_phase_start, log_phase_transition};
use conveyor_utils::types::JobId;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, error};

use crate::phase_runner::PhaseRunner;

/// Default number of jobs allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

/// A request to run a pipeline for one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub subject: String,
    pub attributes: BTreeMap<String, String>,
    /// Phases in execution order
    pub phases: Vec<PhaseSpec>,
}

impl JobRequest {
    #[must_use]
    pub fn new(subject: impl Into<String>, phases: Vec<PhaseSpec>) -> Self {
        Self {
            subject: subject.into(),
            attributes: BTreeMap::new(),
            phases,
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes.extend(attributes);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub max_concurrent_jobs: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
        }
    }
}

struct Inner {
    registry: Arc<JobRegistry>,
    runner: PhaseRunner,
    permits: Arc<Semaphore>,
    config: OrchestratorConfig,
}

/// Drives jobs through their phases and records every outcome in the
/// [`JobRegistry`].
///
/// The orchestrator is the only writer of job state. Cloning is cheap and
/// clones share the same registry, catalog and concurrency limit.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        registry: Arc<JobRegistry>,
        catalog: ProducerCatalog,
        config: OrchestratorConfig,
    ) -> Self {
        let max = config.max_concurrent_jobs.max(1);
        Self {
            inner: Arc::new(Inner {
                registry,
                runner: PhaseRunner::new(Arc::new(catalog)),
                permits: Arc::new(Semaphore::new(max)),
                config: OrchestratorConfig {
                    max_concurrent_jobs: max,
                },
            }),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.inner.registry
    }

    /// Read-only status surface over this orchestrator's jobs.
    #[must_use]
    pub fn reporter(&self) -> StatusReporter {
        StatusReporter::new(Arc::clone(&self.inner.registry))
    }

    #[must_use]
    pub fn config(&self) -> OrchestratorConfig {
        self.inner.config
    }

    /// Check a request without enqueuing it.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: empty subject, empty pipeline, an
    /// empty or duplicate phase name, a producer missing from the catalog, a
    /// zero timeout, or a weight above 100.
    pub fn validate(&self, request: &JobRequest) -> Result<(), ValidationError> {
        if request.subject.trim().is_empty() {
            return Err(ValidationError::EmptySubject);
        }
        if request.phases.is_empty() {
            return Err(ValidationError::EmptyPipeline);
        }

        let catalog = self.inner.runner.catalog();
        let mut seen = HashSet::new();
        for (index, phase) in request.phases.iter().enumerate() {
            if phase.name.trim().is_empty() {
                return Err(ValidationError::EmptyPhaseName { index });
            }
            if !seen.insert(phase.name.as_str()) {
                return Err(ValidationError::DuplicatePhase {
                    name: phase.name.clone(),
                });
            }
            if !catalog.contains(&phase.producer) {
                return Err(ValidationError::UnknownProducer {
                    phase: phase.name.clone(),
                    producer: phase.producer.clone(),
                });
            }
            if phase.timeout.is_zero() {
                return Err(ValidationError::ZeroTimeout {
                    phase: phase.name.clone(),
                });
            }
            if phase.weight > 100 {
                return Err(ValidationError::WeightOutOfRange {
                    phase: phase.name.clone(),
                    weight: phase.weight,
                });
            }
        }
        Ok(())
    }

    /// Validate and register a job, start it in the background, and return
    /// its id without waiting for any phase to run.
    ///
    /// The job stays Queued until a concurrency permit is free.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for a malformed request; nothing is
    /// registered in that case.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, request: JobRequest) -> Result<JobId, ValidationError> {
        self.validate(&request)?;

        let plan = request.phases.iter().map(PlannedPhase::from).collect();
        let job = self
            .inner
            .registry
            .create(request.subject, request.attributes, plan);
        let id = job.id.clone();

        let span = job_span(id.as_str(), &job.subject);
        let inner = Arc::clone(&self.inner);
        let job_id = job.id;
        tokio::spawn(
            async move {
                drive(inner, job_id, request.phases).await;
            }
            .instrument(span),
        );

        Ok(id)
    }

    /// Stop admitting jobs; jobs still waiting for a permit end in Error.
    ///
    /// Jobs already running finish normally.
    pub fn shutdown(&self) {
        self.inner.permits.close();
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.inner.config)
            .field("catalog", self.inner.runner.catalog())
            .finish()
    }
}

/// Apply a mutation. A rejection is a contract violation; the job is failed
/// so that nobody waits on it forever.
fn apply(registry: &JobRegistry, id: &JobId, mutation: JobMutation) -> Option<Job> {
    let label = mutation.label();
    match registry.update(id, mutation) {
        Ok(job) => Some(job),
        Err(err) => {
            error!(job_id = %id, mutation = label, error = %err, "Job update rejected");
            let error = JobError::new(FailureKind::Cancelled, format!("job state error: {err}"));
            if let Ok(job) = registry.update(id, JobMutation::Fail { error }) {
                log_job_finished(id.as_str(), job.status, job.elapsed_ms(Utc::now()));
            }
            None
        }
    }
}

async fn drive(inner: Arc<Inner>, id: JobId, phases: Vec<PhaseSpec>) {
    let registry = &inner.registry;

    let Ok(_permit) = Arc::clone(&inner.permits).acquire_owned().await else {
        let error = JobError::new(
            FailureKind::Cancelled,
            "orchestrator shut down before the job started",
        );
        if let Some(job) = apply(registry, &id, JobMutation::Fail { error }) {
            log_job_finished(id.as_str(), job.status, 0);
        }
        return;
    };
    debug!(job_id = %id, "Acquired execution permit");

    for spec in &phases {
        let Some(job) = apply(
            registry,
            &id,
            JobMutation::EnterPhase {
                phase: spec.name.clone(),
            },
        ) else {
            return;
        };

        log_phase_start(id.as_str(), &spec.name, spec.required);
        let result = inner.runner.run(&job, spec).await;

        match settle(registry, &id, spec, result) {
            Some(job) if job.is_terminal() => {
                log_job_finished(id.as_str(), job.status, job.elapsed_ms(Utc::now()));
                return;
            }
            Some(_) => {}
            None => return,
        }
    }

    if let Some(job) = apply(registry, &id, JobMutation::Complete) {
        log_job_finished(id.as_str(), job.status, job.elapsed_ms(Utc::now()));
    }
}

/// Record one phase result according to the phase's required flag.
fn settle(
    registry: &JobRegistry,
    id: &JobId,
    spec: &PhaseSpec,
    result: PhaseResult,
) -> Option<Job> {
    let detail = result.error_detail.as_ref().map(ToString::to_string);
    let aborts_job = result.outcome == PhaseOutcome::Failed && spec.required;
    let result = if aborts_job {
        result
    } else {
        result.into_warning()
    };

    log_phase_transition(
        id.as_str(),
        &spec.name,
        result.outcome,
        result.duration_ms,
        detail.as_deref(),
        aborts_job,
    );

    let mutation = if aborts_job {
        JobMutation::Abort { result }
    } else {
        JobMutation::RecordPhase {
            result,
            weight: spec.weight,
        }
    };
    apply(registry, id, mutation)
}
