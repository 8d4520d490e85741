//! Subprocess execution for conveyor phases
//!
//! [`CommandProducer`] runs one argv-style [`CommandSpec`] per phase and
//! speaks a small stdin/stdout JSON protocol with it, so existing scripts can
//! be wired into a pipeline without the engine knowing they are processes.

pub mod command_spec;
pub mod producer;

pub use command_spec::CommandSpec;
pub use producer::{CommandProducer, STDERR_TAIL_BYTES, parse_stdout, stderr_tail};
