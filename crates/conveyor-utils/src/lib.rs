//! Foundation utilities shared by every conveyor crate.
//!
//! Holds the job identity types, the error taxonomy, CLI exit codes and the
//! tracing setup. Nothing in here knows how a pipeline is executed.

pub mod error;
pub mod exit_codes;
pub mod logging;
pub mod types;
