//! Async task tracking for conveyor
//!
//! Some providers do not answer a request with a result; they accept the work,
//! hand back a task id, and report on it when asked. This crate turns that
//! protocol into a single awaitable call with a hard wait ceiling:
//!
//! - [`AsyncProvider`] is the submit/query capability a provider implements.
//! - [`TaskPoller`] submits and polls, separating transient query failures
//!   (retried) from a provider-reported `Fail` (terminal).
//! - [`PolledProducer`] exposes a poller as a phase [`Producer`](conveyor_phase_api::Producer).
//! - [`HttpTaskProvider`] is a ready-made provider for create-task /
//!   record-info HTTP APIs.

mod http_client;
pub mod http_task;
pub mod poller;
pub mod producer;
pub mod task;

pub use http_client::redact_error_message;
pub use http_task::{HttpTaskProvider, HttpTaskSettings};
pub use poller::{
    AsyncProvider, DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL, DEFAULT_QUERY_TIMEOUT,
    MIN_POLL_INTERVAL, PollPolicy, TaskPoller,
};
pub use producer::PolledProducer;
pub use task::{Task, TaskId, TaskState, TaskStatusReport};
