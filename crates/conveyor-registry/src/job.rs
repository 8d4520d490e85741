//! Job record and the mutations the registry applies to it.

use chrono::{DateTime, Utc};
use conveyor_phase_api::{ErrorDetail, FailureKind, PhaseOutcome, PhaseResult, PhaseSpec};
use conveyor_utils::types::{JobId, JobStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Upper bound of [`Job::progress`].
pub const MAX_PROGRESS: u8 = 100;

/// A phase as declared in the job's plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedPhase {
    pub name: String,
    pub required: bool,
    pub weight: u8,
}

impl From<&PhaseSpec> for PlannedPhase {
    fn from(spec: &PhaseSpec) -> Self {
        Self {
            name: spec.name.clone(),
            required: spec.required,
            weight: spec.weight,
        }
    }
}

/// Why a job ended in [`JobStatus::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    /// Phase that aborted the job, if the failure happened inside one
    pub phase: Option<String>,
    pub kind: FailureKind,
    pub message: String,
}

impl JobError {
    #[must_use]
    pub fn in_phase(phase: impl Into<String>, detail: &ErrorDetail) -> Self {
        Self {
            phase: Some(phase.into()),
            kind: detail.kind,
            message: detail.message.clone(),
        }
    }

    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            phase: None,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.phase {
            Some(phase) => write!(f, "phase '{phase}' failed ({}): {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// One pipeline run for a subject.
///
/// Jobs are only ever changed through [`crate::JobRegistry::update`]; copies
/// handed out by the registry are snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub subject: String,
    pub attributes: BTreeMap<String, String>,
    pub plan: Vec<PlannedPhase>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub current_phase: Option<String>,
    pub progress: u8,
    pub phase_results: Vec<PhaseResult>,
    pub error: Option<JobError>,
}

impl Job {
    pub(crate) fn new(
        subject: String,
        attributes: BTreeMap<String, String>,
        plan: Vec<PlannedPhase>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::generate(&subject, now),
            subject,
            attributes,
            plan,
            created_at: now,
            started_at: None,
            completed_at: None,
            status: JobStatus::Queued,
            current_phase: None,
            progress: 0,
            phase_results: Vec::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Milliseconds between start (or creation, if never started) and
    /// completion, or `now` while the job is still open.
    #[must_use]
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        let from = self.started_at.unwrap_or(self.created_at);
        let to = self.completed_at.unwrap_or(now);
        u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
    }

    /// Name of the next phase the plan expects to be entered.
    #[must_use]
    pub fn next_planned_phase(&self) -> Option<&PlannedPhase> {
        self.plan.get(self.phase_results.len())
    }

    /// Whether the current phase already has a recorded result.
    fn current_phase_recorded(&self) -> bool {
        match (&self.current_phase, self.phase_results.last()) {
            (Some(current), Some(last)) => last.phase_name == *current,
            _ => false,
        }
    }

    #[must_use]
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            subject: self.subject.clone(),
            status: self.status,
            current_phase: self.current_phase.clone(),
            progress: self.progress,
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }

    /// Apply `mutation` in place, or explain why it is not allowed.
    ///
    /// On error the job is left untouched.
    pub(crate) fn apply(
        &mut self,
        mutation: JobMutation,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        if self.is_terminal() {
            return Err(format!("job is {} and cannot be modified", self.status));
        }
        let target = mutation.target_status();
        if !self.status.can_transition_to(target) {
            return Err(format!(
                "cannot {} a {} job (would move to {target})",
                mutation.label(),
                self.status
            ));
        }

        match mutation {
            JobMutation::EnterPhase { phase } => self.enter_phase(phase, now),
            JobMutation::RecordPhase { result, weight } => self.record_phase(result, weight),
            JobMutation::Abort { result } => self.abort(result, now),
            JobMutation::Complete => self.complete(now),
            JobMutation::Fail { error } => {
                self.finish(JobStatus::Error, now);
                self.error = Some(error);
                Ok(())
            }
        }
    }

    fn enter_phase(&mut self, phase: String, now: DateTime<Utc>) -> Result<(), String> {
        if self.status == JobStatus::Running && !self.current_phase_recorded() {
            return Err(format!(
                "phase '{}' has no recorded result yet",
                self.current_phase.as_deref().unwrap_or_default()
            ));
        }
        let expected = self
            .next_planned_phase()
            .ok_or_else(|| format!("every planned phase already ran; cannot enter '{phase}'"))?;
        if expected.name != phase {
            return Err(format!(
                "phase '{phase}' entered out of order; next planned phase is '{}'",
                expected.name
            ));
        }

        if self.status == JobStatus::Queued {
            self.status = JobStatus::Running;
            self.started_at = Some(now);
        }
        self.current_phase = Some(phase);
        Ok(())
    }

    fn check_result_matches_current(&self, result: &PhaseResult) -> Result<(), String> {
        if self.status != JobStatus::Running {
            return Err("no phase is running".to_string());
        }
        if self.current_phase.as_deref() != Some(result.phase_name.as_str()) {
            return Err(format!(
                "result for '{}' does not match current phase '{}'",
                result.phase_name,
                self.current_phase.as_deref().unwrap_or_default()
            ));
        }
        if self.current_phase_recorded() {
            return Err(format!("phase '{}' already recorded", result.phase_name));
        }
        Ok(())
    }

    fn record_phase(&mut self, result: PhaseResult, weight: u8) -> Result<(), String> {
        self.check_result_matches_current(&result)?;
        if result.outcome == PhaseOutcome::Failed {
            return Err(format!(
                "failed result for '{}' must abort the job",
                result.phase_name
            ));
        }
        self.progress = self.progress.saturating_add(weight).min(MAX_PROGRESS);
        self.phase_results.push(result);
        Ok(())
    }

    fn abort(&mut self, result: PhaseResult, now: DateTime<Utc>) -> Result<(), String> {
        self.check_result_matches_current(&result)?;
        if result.outcome != PhaseOutcome::Failed {
            return Err(format!(
                "cannot abort on a {} result for '{}'",
                result.outcome, result.phase_name
            ));
        }
        let detail = result
            .error_detail
            .clone()
            .unwrap_or_else(|| ErrorDetail::new(FailureKind::Provider, "phase failed"));
        self.error = Some(JobError::in_phase(result.phase_name.clone(), &detail));
        self.phase_results.push(result);
        self.finish(JobStatus::Error, now);
        Ok(())
    }

    fn complete(&mut self, now: DateTime<Utc>) -> Result<(), String> {
        if let Some(next) = self.next_planned_phase() {
            return Err(format!("phase '{}' has not run", next.name));
        }
        let missing = self.plan.iter().filter(|p| p.required).find(|p| {
            !self
                .phase_results
                .iter()
                .any(|r| r.phase_name == p.name && r.is_success())
        });
        if let Some(phase) = missing {
            return Err(format!("required phase '{}' did not succeed", phase.name));
        }

        self.progress = MAX_PROGRESS;
        self.finish(JobStatus::Complete, now);
        Ok(())
    }

    fn finish(&mut self, status: JobStatus, now: DateTime<Utc>) {
        self.status = status;
        self.current_phase = None;
        self.completed_at = Some(now);
    }
}

/// A state change requested of the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum JobMutation {
    /// Start the next planned phase (Queued → Running, or Running → Running)
    EnterPhase { phase: String },
    /// Append a successful or warning result and credit `weight` progress
    RecordPhase { result: PhaseResult, weight: u8 },
    /// Append a failed result and move to Error
    Abort { result: PhaseResult },
    /// Move to Complete once every required phase succeeded
    Complete,
    /// Move to Error without a phase result
    Fail { error: JobError },
}

impl JobMutation {
    /// Status the job holds once this mutation is applied.
    #[must_use]
    pub fn target_status(&self) -> JobStatus {
        match self {
            Self::EnterPhase { .. } | Self::RecordPhase { .. } => JobStatus::Running,
            Self::Complete => JobStatus::Complete,
            Self::Abort { .. } | Self::Fail { .. } => JobStatus::Error,
        }
    }

    /// Short label used in logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::EnterPhase { .. } => "enter_phase",
            Self::RecordPhase { .. } => "record_phase",
            Self::Abort { .. } => "abort",
            Self::Complete => "complete",
            Self::Fail { .. } => "fail",
        }
    }
}

/// Compact view of a job for history listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub subject: String,
    pub status: JobStatus,
    pub current_phase: Option<String>,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A page of history, newest first, with the number of jobs matching the query.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobHistory {
    pub total: usize,
    pub jobs: Vec<JobSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn plan() -> Vec<PlannedPhase> {
        vec![
            PlannedPhase {
                name: "a".into(),
                required: true,
                weight: 40,
            },
            PlannedPhase {
                name: "b".into(),
                required: false,
                weight: 30,
            },
        ]
    }

    fn job() -> Job {
        Job::new("Acme".into(), BTreeMap::new(), plan(), Utc::now())
    }

    fn ok(name: &str) -> PhaseResult {
        PhaseResult::success(name, json!(name), Duration::ZERO)
    }

    fn failed(name: &str) -> PhaseResult {
        PhaseResult::failed(
            name,
            ErrorDetail::new(FailureKind::Provider, "provider down"),
            Duration::ZERO,
        )
    }

    fn enter(phase: &str) -> JobMutation {
        JobMutation::EnterPhase {
            phase: phase.into(),
        }
    }

    #[test]
    fn test_happy_path_reaches_complete() {
        let mut job = job();
        let now = Utc::now();
        job.apply(enter("a"), now).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());

        job.apply(
            JobMutation::RecordPhase {
                result: ok("a"),
                weight: 40,
            },
            now,
        )
        .unwrap();
        assert_eq!(job.progress, 40);
        assert_eq!(job.current_phase.as_deref(), Some("a"));

        job.apply(enter("b"), now).unwrap();
        job.apply(
            JobMutation::RecordPhase {
                result: failed("b").into_warning(),
                weight: 30,
            },
            now,
        )
        .unwrap();
        job.apply(JobMutation::Complete, now).unwrap();

        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.progress, MAX_PROGRESS);
        assert!(job.current_phase.is_none());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_enter_out_of_order_is_rejected() {
        let mut job = job();
        let err = job.apply(enter("b"), Utc::now()).unwrap_err();
        assert!(err.contains("out of order"));
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn test_enter_before_recording_current_is_rejected() {
        let mut job = job();
        job.apply(enter("a"), Utc::now()).unwrap();
        assert!(job.apply(enter("b"), Utc::now()).is_err());
    }

    #[test]
    fn test_record_rejects_failed_outcome_and_mismatched_phase() {
        let mut job = job();
        job.apply(enter("a"), Utc::now()).unwrap();
        assert!(
            job.apply(
                JobMutation::RecordPhase {
                    result: failed("a"),
                    weight: 0
                },
                Utc::now()
            )
            .is_err()
        );
        assert!(
            job.apply(
                JobMutation::RecordPhase {
                    result: ok("b"),
                    weight: 0
                },
                Utc::now()
            )
            .is_err()
        );
        assert!(job.phase_results.is_empty());
    }

    #[test]
    fn test_abort_copies_error_detail() {
        let mut job = job();
        job.apply(enter("a"), Utc::now()).unwrap();
        job.apply(JobMutation::Abort { result: failed("a") }, Utc::now())
            .unwrap();

        assert_eq!(job.status, JobStatus::Error);
        assert!(job.current_phase.is_none());
        let error = job.error.as_ref().unwrap();
        assert_eq!(error.phase.as_deref(), Some("a"));
        assert_eq!(error.kind, FailureKind::Provider);
        assert_eq!(job.phase_results.len(), 1);
    }

    #[test]
    fn test_complete_requires_all_phases() {
        let mut job = job();
        job.apply(enter("a"), Utc::now()).unwrap();
        job.apply(
            JobMutation::RecordPhase {
                result: ok("a"),
                weight: 40,
            },
            Utc::now(),
        )
        .unwrap();
        let err = job.apply(JobMutation::Complete, Utc::now()).unwrap_err();
        assert!(err.contains("'b' has not run"));
    }

    #[test]
    fn test_queued_job_cannot_complete() {
        let mut job = job();
        let snapshot = job.clone();
        let err = job.apply(JobMutation::Complete, Utc::now()).unwrap_err();
        assert_eq!(err, "cannot complete a queued job (would move to complete)");
        assert_eq!(job, snapshot);
    }

    #[test]
    fn test_mutation_target_status_follows_state_machine() {
        let queued = JobStatus::Queued;
        assert!(queued.can_transition_to(enter("a").target_status()));
        assert!(queued.can_transition_to(
            JobMutation::Fail {
                error: JobError::new(FailureKind::Cancelled, "shutdown"),
            }
            .target_status()
        ));
        assert!(!queued.can_transition_to(JobMutation::Complete.target_status()));
        assert_eq!(
            JobMutation::Abort { result: failed("a") }.target_status(),
            JobStatus::Error
        );
    }

    #[test]
    fn test_terminal_job_is_immutable() {
        let mut job = job();
        job.apply(
            JobMutation::Fail {
                error: JobError::new(FailureKind::Cancelled, "shutdown"),
            },
            Utc::now(),
        )
        .unwrap();
        let snapshot = job.clone();
        assert!(job.apply(enter("a"), Utc::now()).is_err());
        assert!(job.apply(JobMutation::Complete, Utc::now()).is_err());
        assert_eq!(job, snapshot);
    }

    #[test]
    fn test_progress_is_clamped() {
        let mut job = Job::new(
            "Acme".into(),
            BTreeMap::new(),
            vec![
                PlannedPhase {
                    name: "a".into(),
                    required: true,
                    weight: 90,
                },
                PlannedPhase {
                    name: "b".into(),
                    required: true,
                    weight: 90,
                },
            ],
            Utc::now(),
        );
        for name in ["a", "b"] {
            job.apply(enter(name), Utc::now()).unwrap();
            job.apply(
                JobMutation::RecordPhase {
                    result: ok(name),
                    weight: 90,
                },
                Utc::now(),
            )
            .unwrap();
        }
        assert_eq!(job.progress, MAX_PROGRESS);
    }

    #[test]
    fn test_job_error_display() {
        let err = JobError::in_phase("research", &ErrorDetail::new(FailureKind::Timeout, "slow"));
        assert_eq!(err.to_string(), "phase 'research' failed (timeout): slow");
    }
}
