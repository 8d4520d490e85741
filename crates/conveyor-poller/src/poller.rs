//! Submit-then-poll driver for async providers.

use async_trait::async_trait;
use conveyor_phase_api::Payload;
use conveyor_utils::error::{PollError, ProviderError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::task::{Task, TaskId, TaskStatusReport};

/// Default delay between status queries
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default ceiling on the total time spent polling one task
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(120);

/// Default bound on a single status query
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Shortest delay allowed between status queries; smaller intervals are raised to it
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A provider that accepts work now and reports on it later.
#[async_trait]
pub trait AsyncProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Hand `payload` to the provider and return the id it assigned.
    async fn submit(&self, payload: &Payload) -> Result<TaskId, ProviderError>;

    /// Ask the provider where `task_id` stands.
    async fn query(&self, task_id: &TaskId) -> Result<TaskStatusReport, ProviderError>;
}

/// Timing parameters for one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
    pub query_timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

impl PollPolicy {
    /// `interval` is raised to [`MIN_POLL_INTERVAL`] when shorter.
    #[must_use]
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self {
            interval: interval.max(MIN_POLL_INTERVAL),
            max_wait,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }
}

/// Drives an [`AsyncProvider`] from submission to a terminal task state.
///
/// Status queries that fail are logged and retried on the next tick; they
/// never end the loop early. The loop ends when the provider reports
/// `Success` or `Fail`, or when `max_wait` is used up, whichever comes first.
#[derive(Clone)]
pub struct TaskPoller {
    provider: Arc<dyn AsyncProvider>,
    policy: PollPolicy,
}

impl TaskPoller {
    #[must_use]
    pub fn new(provider: Arc<dyn AsyncProvider>, policy: PollPolicy) -> Self {
        Self { provider, policy }
    }

    #[must_use]
    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    #[must_use]
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn submit(&self, payload: &Payload) -> Result<TaskId, PollError> {
        let task_id = self
            .provider
            .submit(payload)
            .await
            .map_err(PollError::Submit)?;
        info!(provider = self.provider.name(), task_id = %task_id, "Task submitted");
        Ok(task_id)
    }

    /// Query `task_id` every `interval` until it is terminal or `max_wait` elapses.
    ///
    /// Each query is bounded by the policy's query timeout and by the budget
    /// left; sleeps are clamped to the budget left, so the call returns no
    /// later than `max_wait` after it started. An `interval` shorter than
    /// [`MIN_POLL_INTERVAL`] is raised to it.
    pub async fn poll_until_terminal(
        &self,
        task_id: &TaskId,
        interval: Duration,
        max_wait: Duration,
    ) -> Result<Task, PollError> {
        let provider = self.provider.name();
        let interval = interval.max(MIN_POLL_INTERVAL);
        let start = Instant::now();
        let deadline = start + max_wait;
        let mut task = Task::submitted(task_id.clone());
        let mut polls: u32 = 0;

        while Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let bound = self.policy.query_timeout.min(remaining);
            polls += 1;

            match tokio::time::timeout(bound, self.provider.query(task_id)).await {
                Ok(Ok(report)) => {
                    task.apply(report)?;
                    debug!(provider, task_id = %task_id, state = %task.state, polls, "Task status");
                    if task.is_terminal() {
                        info!(
                            provider,
                            task_id = %task_id,
                            state = %task.state,
                            polls,
                            elapsed_ms = millis(start.elapsed()),
                            "Task finished"
                        );
                        return Ok(task);
                    }
                }
                Ok(Err(err)) => {
                    warn!(
                        provider,
                        task_id = %task_id,
                        transient = err.is_transient(),
                        error = %err,
                        "Status query failed, will retry"
                    );
                }
                Err(_) => {
                    warn!(
                        provider,
                        task_id = %task_id,
                        timeout_ms = millis(bound),
                        "Status query timed out, will retry"
                    );
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(interval.min(remaining)).await;
        }

        let waited = start.elapsed();
        warn!(
            provider,
            task_id = %task_id,
            polls,
            waited_ms = millis(waited),
            "Gave up waiting for task"
        );
        Err(PollError::Timeout {
            task_id: task_id.to_string(),
            waited,
            polls,
        })
    }

    /// Submit `payload` and poll with this poller's policy.
    pub async fn run(&self, payload: &Payload) -> Result<Task, PollError> {
        let task_id = self.submit(payload).await?;
        self.poll_until_terminal(&task_id, self.policy.interval, self.policy.max_wait)
            .await
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl std::fmt::Debug for TaskPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPoller")
            .field("provider", &self.provider.name())
            .field("policy", &self.policy)
            .finish()
    }
}
