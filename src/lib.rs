//! conveyor - multi-phase job pipeline runner
//!
//! conveyor runs an ordered list of phases for a subject (for example a
//! company) as one background job. Each phase delegates to a [`Producer`]:
//! a subprocess, a remote provider polled until its task finishes, or any
//! async function. Required phases abort the job when they fail; optional
//! phases are recorded as warnings and the job carries on. Callers follow a
//! job through [`StatusReporter`].
//!
//! conveyor can be used in two ways:
//! - **CLI**: run a configured pipeline with `conveyor run <SUBJECT>`
//! - **Library**: register producers in a [`ProducerCatalog`] and enqueue
//!   jobs on an [`Orchestrator`]
//!
//! # Quick Start (CLI)
//!
//! ```bash
//! # .conveyor/config.toml declares the pipeline and its producers
//! conveyor validate
//! conveyor run "Acme Corp" --attr industry=logistics --json
//! ```
//!
//! # Quick Start (Library)
//!
//! ```rust,no_run
//! use conveyor::{
//!     FnProducer, JobRegistry, JobRequest, Orchestrator, OrchestratorConfig, PhaseSpec,
//!     ProducerCatalog,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = ProducerCatalog::new()
//!     .with(
//!         "research",
//!         Arc::new(FnProducer::new(|ctx| async move {
//!             Ok(json!({ "summary": format!("notes on {}", ctx.subject) }))
//!         })),
//!     );
//!
//! let orchestrator = Orchestrator::new(
//!     Arc::new(JobRegistry::new()),
//!     catalog,
//!     OrchestratorConfig::default(),
//! );
//! let id = orchestrator.enqueue(JobRequest::new(
//!     "Acme Corp",
//!     vec![PhaseSpec::required("research").with_weight(100)],
//! ))?;
//!
//! let status = orchestrator
//!     .reporter()
//!     .wait_for_terminal(&id, Duration::from_secs(60))
//!     .await?;
//! println!("{} finished as {}", status.id, status.status);
//! # Ok(())
//! # }
//! ```
//!
//! # Stable Public API
//!
//! The re-exports below are the supported surface. The member crates are
//! reachable through their own paths but are not covered by semver.

// ============================================================================
// Stable Public API
// ============================================================================

pub use conveyor_config::{CliArgs, Config, ConfigBuilder};
pub use conveyor_engine::{JobRequest, Orchestrator, OrchestratorConfig, PhaseRunner};
pub use conveyor_phase_api::{
    ErrorDetail, FailureKind, FnProducer, Payload, PhaseContext, PhaseOutcome, PhaseResult,
    PhaseSpec, Producer, ProducerCatalog, ProducerError,
};
pub use conveyor_poller::{AsyncProvider, PollPolicy, PolledProducer, TaskPoller};
pub use conveyor_registry::{Job, JobError, JobRegistry};
pub use conveyor_runner::{CommandProducer, CommandSpec};
pub use conveyor_status::{JobResults, JobStatusView, StatusReporter};
pub use conveyor_utils::error::{ConveyorError, ErrorCategory, UserFriendlyError};
pub use conveyor_utils::exit_codes::ExitCode;
pub use conveyor_utils::types::{JobId, JobStatus};

// ============================================================================
// Module access (not covered by semver)
// ============================================================================

#[doc(hidden)]
pub use conveyor_config as config;
#[doc(hidden)]
pub use conveyor_poller as poller;
#[doc(hidden)]
pub use conveyor_utils::{error, logging};

pub mod cli;
pub mod pipeline;
