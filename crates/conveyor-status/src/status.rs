//! Status views over the job registry.

use chrono::{DateTime, Utc};
use conveyor_phase_api::{Payload, PhaseOutcome, PhaseResult};
use conveyor_registry::{Job, JobError, JobHistory, JobRegistry};
use conveyor_utils::error::QueryError;
use conveyor_utils::types::{JobId, JobStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Point-in-time status of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: JobId,
    pub subject: String,
    pub attributes: BTreeMap<String, String>,
    pub status: JobStatus,
    pub current_phase: Option<String>,
    pub progress: u8,
    /// Human-readable detail once the job has aborted
    pub error: Option<JobError>,
    pub phases_total: usize,
    pub phases_done: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
}

impl JobStatusView {
    #[must_use]
    pub fn from_job(job: &Job, now: DateTime<Utc>) -> Self {
        Self {
            id: job.id.clone(),
            subject: job.subject.clone(),
            attributes: job.attributes.clone(),
            status: job.status,
            current_phase: job.current_phase.clone(),
            progress: job.progress,
            error: job.error.clone(),
            phases_total: job.plan.len(),
            phases_done: job.phase_results.len(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            elapsed_ms: job.elapsed_ms(now),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Results of a completed job, in phase order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResults {
    pub id: JobId,
    pub subject: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
    pub phase_results: Vec<PhaseResult>,
}

impl JobResults {
    /// Names of optional phases that failed and were recorded as warnings.
    #[must_use]
    pub fn warnings(&self) -> Vec<&str> {
        self.phase_results
            .iter()
            .filter(|r| r.outcome == PhaseOutcome::Warning)
            .map(|r| r.phase_name.as_str())
            .collect()
    }

    /// Payload produced by `phase`, if it ran.
    #[must_use]
    pub fn payload(&self, phase: &str) -> Option<&Payload> {
        self.phase_results
            .iter()
            .find(|r| r.phase_name == phase)
            .map(|r| &r.payload)
    }
}

/// Read-only query surface over a [`JobRegistry`].
#[derive(Clone)]
pub struct StatusReporter {
    registry: Arc<JobRegistry>,
}

impl StatusReporter {
    #[must_use]
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }

    /// Current status, progress and error of a job.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::NotFound` for an unknown id.
    pub fn get_status(&self, id: &JobId) -> Result<JobStatusView, QueryError> {
        let job = self.registry.get(id)?;
        Ok(JobStatusView::from_job(&job, Utc::now()))
    }

    /// Phase results of a completed job.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::NotReady` unless the job is Complete, including
    /// when it ended in Error.
    pub fn get_results(&self, id: &JobId) -> Result<JobResults, QueryError> {
        let job = self.registry.get(id)?;
        if job.status != JobStatus::Complete {
            return Err(QueryError::NotReady {
                id: id.to_string(),
                status: job.status,
            });
        }
        Ok(JobResults {
            elapsed_ms: job.elapsed_ms(Utc::now()),
            id: job.id,
            subject: job.subject,
            completed_at: job.completed_at,
            phase_results: job.phase_results,
        })
    }

    /// Up to `limit` most recent jobs, newest first.
    #[must_use]
    pub fn list_history(&self, limit: usize) -> JobHistory {
        self.registry.list(limit, None)
    }

    /// Jobs created at or after `since`, newest first.
    #[must_use]
    pub fn list_history_since(&self, limit: usize, since: DateTime<Utc>) -> JobHistory {
        self.registry.list(limit, Some(since))
    }

    /// Wait until the job reaches Complete or Error.
    ///
    /// Sleeps on the registry's change notifications rather than polling.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::NotFound` for an unknown id and
    /// `QueryError::WaitTimeout` if the job is still open after `timeout`.
    pub async fn wait_for_terminal(
        &self,
        id: &JobId,
        timeout: Duration,
    ) -> Result<JobStatusView, QueryError> {
        // Subscribe before the first read so no change between the two is missed.
        let mut changes = self.registry.subscribe();
        let deadline = Instant::now() + timeout;

        loop {
            let job = self.registry.get(id)?;
            if job.is_terminal() {
                return Ok(JobStatusView::from_job(&job, Utc::now()));
            }

            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => {
                    debug!(job_id = %id, status = %job.status, "Gave up waiting for job");
                    return Err(QueryError::WaitTimeout {
                        id: id.to_string(),
                        waited: timeout,
                    });
                }
            }
        }
    }
}

impl std::fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReporter")
            .field("jobs", &self.registry.len())
            .finish()
    }
}
