//! Exit code constants for the conveyor CLI.
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Job completed |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CLI_ARGS` | Invalid CLI arguments, configuration or job request |
//! | 3 | `JOB_FAILED` | Job finished in the error state |
//! | 4 | `NOT_READY` | Job did not finish in time or results are unavailable |

use crate::error::{ConveyorError, QueryError};

/// Exit codes matching the documented exit code table.
///
/// ```rust
/// use conveyor_utils::exit_codes::ExitCode;
///
/// assert_eq!(ExitCode::SUCCESS.as_i32(), 0);
/// assert_eq!(ExitCode::from_i32(3), ExitCode::JOB_FAILED);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    /// Success - the job completed
    pub const SUCCESS: ExitCode = ExitCode(0);

    /// Internal error - general failure
    pub const INTERNAL: ExitCode = ExitCode(1);

    /// CLI arguments error - invalid arguments, configuration or job request
    pub const CLI_ARGS: ExitCode = ExitCode(2);

    /// Job failed - a required phase failed and the job ended in error
    pub const JOB_FAILED: ExitCode = ExitCode(3);

    /// Not ready - waiting for the job timed out or results are unavailable
    pub const NOT_READY: ExitCode = ExitCode(4);

    /// Get the numeric exit code value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Create an ExitCode from a raw i32 value.
    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        ExitCode(code)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.0
    }
}

impl From<&ConveyorError> for ExitCode {
    fn from(error: &ConveyorError) -> Self {
        match error {
            ConveyorError::Config(_) | ConveyorError::Validation(_) => Self::CLI_ARGS,
            ConveyorError::Query(QueryError::NotReady { .. } | QueryError::WaitTimeout { .. }) => {
                Self::NOT_READY
            }
            ConveyorError::Query(QueryError::NotFound { .. })
            | ConveyorError::Registry(_)
            | ConveyorError::Io(_) => Self::INTERNAL,
        }
    }
}
