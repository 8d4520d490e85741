//! Provider-side task model.

use conveyor_phase_api::Payload;
use conveyor_utils::error::PollError;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{AsRefStr, EnumString};

/// Identifier assigned to a task by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Provider-side lifecycle of a task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskState {
    Queued,
    Processing,
    Success,
    Fail,
}

impl TaskState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Fail)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// One answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusReport {
    pub state: TaskState,
    pub result: Option<Payload>,
    pub reason: Option<String>,
}

impl TaskStatusReport {
    #[must_use]
    pub fn queued() -> Self {
        Self {
            state: TaskState::Queued,
            result: None,
            reason: None,
        }
    }

    #[must_use]
    pub fn processing() -> Self {
        Self {
            state: TaskState::Processing,
            result: None,
            reason: None,
        }
    }

    #[must_use]
    pub fn success(result: Payload) -> Self {
        Self {
            state: TaskState::Success,
            result: Some(result),
            reason: None,
        }
    }

    #[must_use]
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            state: TaskState::Fail,
            result: None,
            reason: Some(reason.into()),
        }
    }
}

/// Local view of a submitted task.
///
/// Once `state` is terminal the task is frozen: [`Task::apply`] refuses any
/// report that would change it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub state: TaskState,
    /// Present when `state` is `Success`
    pub result: Option<Payload>,
    /// Present when `state` is `Fail`
    pub reason: Option<String>,
}

impl Task {
    #[must_use]
    pub fn submitted(task_id: TaskId) -> Self {
        Self {
            task_id,
            state: TaskState::Queued,
            result: None,
            reason: None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Fold a status report into the task.
    ///
    /// A repeated identical terminal report is accepted as a no-op.
    pub fn apply(&mut self, report: TaskStatusReport) -> Result<(), PollError> {
        if self.is_terminal() {
            if report.state == self.state {
                return Ok(());
            }
            return Err(PollError::InvalidTaskTransition {
                task_id: self.task_id.to_string(),
                from: self.state.to_string(),
                to: report.state.to_string(),
            });
        }

        self.state = report.state;
        match report.state {
            TaskState::Success => {
                self.result = Some(report.result.unwrap_or(Payload::Null));
            }
            TaskState::Fail => {
                self.reason = Some(
                    report
                        .reason
                        .unwrap_or_else(|| "provider reported failure without a reason".into()),
                );
            }
            TaskState::Queued | TaskState::Processing => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_moves_through_states() {
        let mut task = Task::submitted(TaskId::new("T1"));
        task.apply(TaskStatusReport::processing()).unwrap();
        assert_eq!(task.state, TaskState::Processing);
        task.apply(TaskStatusReport::success(json!("X"))).unwrap();
        assert_eq!(task.state, TaskState::Success);
        assert_eq!(task.result, Some(json!("X")));
    }

    #[test]
    fn test_terminal_task_never_changes_state() {
        let mut task = Task::submitted(TaskId::new("T1"));
        task.apply(TaskStatusReport::fail("nsfw content")).unwrap();

        let err = task.apply(TaskStatusReport::processing()).unwrap_err();
        assert!(matches!(err, PollError::InvalidTaskTransition { .. }));
        assert!(task.apply(TaskStatusReport::success(json!(1))).is_err());
        assert_eq!(task.state, TaskState::Fail);
        assert_eq!(task.reason.as_deref(), Some("nsfw content"));

        task.apply(TaskStatusReport::fail("again")).unwrap();
        assert_eq!(task.reason.as_deref(), Some("nsfw content"));
    }

    #[test]
    fn test_fail_without_reason_gets_placeholder() {
        let mut task = Task::submitted(TaskId::new("T9"));
        task.apply(TaskStatusReport {
            state: TaskState::Fail,
            result: None,
            reason: None,
        })
        .unwrap();
        assert!(task.reason.unwrap().contains("without a reason"));
    }
}
