//! Status queries for conveyor jobs.
//!
//! [`StatusReporter`] is the read-only surface callers poll while jobs run.
//! It never mutates the registry, so it is safe to call at any time.

pub mod status;

pub use status::{JobResults, JobStatusView, StatusReporter};
