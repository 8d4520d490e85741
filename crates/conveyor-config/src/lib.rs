//! Configuration for conveyor
//!
//! Hierarchical configuration with discovery and precedence
//! CLI > file > defaults, loaded from TOML with `[engine]`, `[poller]`,
//! `[[pipeline.phases]]` and `[producers.<name>]` sections.

pub mod config;

pub use config::*;
