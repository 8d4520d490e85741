//! Single-phase execution with timeout and panic containment.

use conveyor_phase_api::{
    ErrorDetail, FailureKind, PhaseContext, PhaseResult, PhaseSpec, ProducerCatalog, ProducerError,
};
use conveyor_registry::Job;
use std::any::Any;
use std::sync::Arc;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Runs one phase of a job against its producer.
///
/// `run` never returns an error: a producer error, a timeout, or a panic
/// inside the producer all come back as a [`PhaseResult`] with outcome
/// `Failed` and an [`ErrorDetail`] saying why.
#[derive(Debug, Clone)]
pub struct PhaseRunner {
    catalog: Arc<ProducerCatalog>,
}

impl PhaseRunner {
    #[must_use]
    pub fn new(catalog: Arc<ProducerCatalog>) -> Self {
        Self { catalog }
    }

    #[must_use]
    pub fn catalog(&self) -> &ProducerCatalog {
        &self.catalog
    }

    /// Execute `spec` for `job`, handing the producer the job's results so far.
    pub async fn run(&self, job: &Job, spec: &PhaseSpec) -> PhaseResult {
        let started = Instant::now();

        let Some(producer) = self.catalog.get(&spec.producer) else {
            return PhaseResult::failed(
                &spec.name,
                ErrorDetail::new(
                    FailureKind::Rejected,
                    format!("no producer registered as '{}'", spec.producer),
                ),
                started.elapsed(),
            );
        };

        let ctx = PhaseContext {
            job_id: job.id.clone(),
            subject: job.subject.clone(),
            attributes: job.attributes.clone(),
            phase: spec.name.clone(),
            prior_results: job.phase_results.clone(),
        };

        // Spawned so a panicking producer surfaces as a JoinError instead of
        // unwinding through the job.
        let mut handle = tokio::spawn(async move { producer.produce(&ctx).await });

        let outcome = match tokio::time::timeout(spec.timeout, &mut handle).await {
            Ok(Ok(Ok(payload))) => Ok(payload),
            Ok(Ok(Err(err))) => Err(ErrorDetail::from(&err)),
            Ok(Err(join_err)) => Err(join_error_detail(join_err)),
            Err(_) => {
                handle.abort();
                debug!(
                    job_id = %job.id,
                    phase = %spec.name,
                    timeout_ms = spec.timeout.as_millis() as u64,
                    "Producer exceeded phase timeout, cancelled"
                );
                Err(ErrorDetail::from(&ProducerError::Timeout {
                    duration: spec.timeout,
                }))
            }
        };

        match outcome {
            Ok(payload) => PhaseResult::success(&spec.name, payload, started.elapsed()),
            Err(detail) => PhaseResult::failed(&spec.name, detail, started.elapsed()),
        }
    }
}

fn join_error_detail(err: JoinError) -> ErrorDetail {
    if err.is_panic() {
        let message = panic_message(err.into_panic());
        warn!(panic = %message, "Producer panicked");
        ErrorDetail::new(
            FailureKind::Panicked,
            format!("producer panicked: {message}"),
        )
    } else {
        ErrorDetail::new(FailureKind::Cancelled, "producer task was cancelled")
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}
