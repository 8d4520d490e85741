//! Execution engine for conveyor pipelines
//!
//! - [`phase_runner`] runs one phase against its producer, bounding it with
//!   the phase timeout and turning every failure into a failed result.
//! - [`orchestrator`] validates job requests, runs each job's phases in
//!   order on its own task, and applies the required/optional policy.

pub mod orchestrator;
pub mod phase_runner;

pub use orchestrator::{DEFAULT_MAX_CONCURRENT_JOBS, JobRequest, Orchestrator, OrchestratorConfig};
pub use phase_runner::PhaseRunner;
