use async_trait::async_trait;
use conveyor_phase_api::{Payload, PhaseContext, Producer, ProducerError};
use std::sync::Arc;
use tracing::debug;

use crate::poller::TaskPoller;
use crate::task::TaskState;

type PayloadBuilder = Arc<dyn Fn(&PhaseContext) -> Payload + Send + Sync>;

/// [`Producer`] backed by an async provider.
///
/// Each call submits one task and polls it with the poller's policy. A
/// provider-reported failure becomes [`ProducerError::TaskFailed`] carrying
/// the provider's reason; running out of budget becomes a timeout.
#[derive(Clone)]
pub struct PolledProducer {
    poller: TaskPoller,
    build_payload: PayloadBuilder,
}

impl PolledProducer {
    /// Submit the serialized phase context as the task payload.
    #[must_use]
    pub fn new(poller: TaskPoller) -> Self {
        Self {
            poller,
            build_payload: Arc::new(|ctx: &PhaseContext| {
                serde_json::to_value(ctx).unwrap_or(Payload::Null)
            }),
        }
    }

    /// Build the task payload from the phase context with `build`.
    #[must_use]
    pub fn with_payload<F>(mut self, build: F) -> Self
    where
        F: Fn(&PhaseContext) -> Payload + Send + Sync + 'static,
    {
        self.build_payload = Arc::new(build);
        self
    }
}

#[async_trait]
impl Producer for PolledProducer {
    async fn produce(&self, ctx: &PhaseContext) -> Result<Payload, ProducerError> {
        let payload = (self.build_payload)(ctx);
        debug!(
            job_id = %ctx.job_id,
            phase = %ctx.phase,
            provider = self.poller.provider_name(),
            "Submitting provider task"
        );

        let task = self.poller.run(&payload).await?;
        match task.state {
            TaskState::Success => Ok(task.result.unwrap_or(Payload::Null)),
            TaskState::Fail => Err(ProducerError::TaskFailed {
                task_id: task.task_id.to_string(),
                reason: task.reason.unwrap_or_default(),
            }),
            TaskState::Queued | TaskState::Processing => Err(ProducerError::InvalidOutput(
                format!("task {} returned in non-terminal state {}", task.task_id, task.state),
            )),
        }
    }
}

impl std::fmt::Debug for PolledProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolledProducer")
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}
