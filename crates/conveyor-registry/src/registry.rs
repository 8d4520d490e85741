use chrono::{DateTime, Utc};
use conveyor_utils::error::RegistryError;
use conveyor_utils::types::JobId;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tracing::debug;

use crate::job::{Job, JobHistory, JobMutation, JobSummary, PlannedPhase};

/// Default number of finished jobs kept in memory.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

#[derive(Default)]
struct Table {
    jobs: HashMap<JobId, Job>,
    /// Creation order, oldest first
    order: VecDeque<JobId>,
}

impl Table {
    /// Drop the oldest finished jobs until at most `limit` remain.
    fn evict_terminal(&mut self, limit: usize) {
        let terminal = self
            .order
            .iter()
            .filter(|id| self.jobs.get(*id).is_some_and(Job::is_terminal))
            .count();
        let mut excess = terminal.saturating_sub(limit);
        if excess == 0 {
            return;
        }

        let jobs = &mut self.jobs;
        self.order.retain(|id| {
            if excess > 0 && jobs.get(id).is_some_and(Job::is_terminal) {
                jobs.remove(id);
                excess -= 1;
                debug!(job_id = %id, "Evicted finished job from history");
                false
            } else {
                true
            }
        });
    }
}

/// In-memory table of jobs.
///
/// Every mutation is a read-modify-write under a single write lock, so
/// concurrent readers only ever observe a job before or after a whole
/// mutation. State-machine rules live in [`Job`]; the registry refuses any
/// mutation the job rejects and reports it as
/// [`RegistryError::InvalidTransition`].
pub struct JobRegistry {
    table: RwLock<Table>,
    changes: watch::Sender<u64>,
    history_limit: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Registry that keeps at most `history_limit` finished jobs.
    #[must_use]
    pub fn with_history_limit(history_limit: usize) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            table: RwLock::new(Table::default()),
            changes,
            history_limit,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.changes.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Register a new Queued job and return a snapshot of it.
    pub fn create(
        &self,
        subject: impl Into<String>,
        attributes: BTreeMap<String, String>,
        plan: Vec<PlannedPhase>,
    ) -> Job {
        let job = Job::new(subject.into(), attributes, plan, Utc::now());
        {
            let mut table = self.write();
            table.evict_terminal(self.history_limit);
            table.order.push_back(job.id.clone());
            table.jobs.insert(job.id.clone(), job.clone());
        }
        debug!(job_id = %job.id, subject = %job.subject, phases = job.plan.len(), "Job created");
        self.bump();
        job
    }

    pub fn get(&self, id: &JobId) -> Result<Job, RegistryError> {
        self.read()
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })
    }

    /// Apply `mutation` atomically and return the updated job.
    pub fn update(&self, id: &JobId, mutation: JobMutation) -> Result<Job, RegistryError> {
        let label = mutation.label();
        let updated = {
            let mut table = self.write();
            let job = table
                .jobs
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound { id: id.to_string() })?;
            let from = job.status;
            job.apply(mutation, Utc::now())
                .map_err(|reason| RegistryError::InvalidTransition {
                    id: id.to_string(),
                    from,
                    reason,
                })?;
            job.clone()
        };
        debug!(
            job_id = %id,
            mutation = label,
            status = %updated.status,
            progress = updated.progress,
            "Job updated"
        );
        self.bump();
        Ok(updated)
    }

    /// Jobs newest first, optionally only those created at or after `since`.
    #[must_use]
    pub fn list(&self, limit: usize, since: Option<DateTime<Utc>>) -> JobHistory {
        let table = self.read();
        let matching = table
            .order
            .iter()
            .rev()
            .filter_map(|id| table.jobs.get(id))
            .filter(|job| since.is_none_or(|since| job.created_at >= since));

        let mut total = 0;
        let mut jobs: Vec<JobSummary> = Vec::with_capacity(limit.min(table.order.len()));
        for job in matching {
            total += 1;
            if jobs.len() < limit {
                jobs.push(job.summary());
            }
        }
        JobHistory { total, jobs }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter that increases after every successful create or update.
    ///
    /// Waiters re-read the job after each change instead of polling on a timer.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.len())
            .field("history_limit", &self.history_limit)
            .finish()
    }
}
