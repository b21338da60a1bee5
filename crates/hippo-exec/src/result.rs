//! Result types for command execution

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::ExecError;

/// Exit status reported when a command could not be run at all
pub const LAUNCH_FAILURE_STATUS: i32 = -1;

/// Result of a command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Captured stdout, or the error text when a failure was ignored
    pub output: String,
    /// Exit status code (0 for success)
    pub status: i32,
    /// stderr output
    pub stderr: String,
    /// Time taken to execute
    pub duration: Duration,
}

impl CommandResult {
    /// Build a result from the captured streams of a finished command
    #[must_use]
    pub fn completed(status: i32, stdout: String, stderr: String, duration: Duration) -> Self {
        Self {
            output: stdout,
            status,
            stderr,
            duration,
        }
    }

    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Apply the `exec` error policy shared by every backend.
///
/// Non-zero exits are logged as warnings with the captured stderr and launch
/// failures as errors. With `ignore_error` both are turned into an `Ok` result
/// whose output is the error text; otherwise they are returned as `Err`.
///
/// # Errors
/// Returns `ExecError::CommandFailed` for a non-zero exit, or the launch error
/// itself, when `ignore_error` is false.
pub fn settle(
    target: &str,
    command: &str,
    outcome: Result<CommandResult, ExecError>,
    ignore_error: bool,
) -> Result<CommandResult, ExecError> {
    match outcome {
        Ok(result) if result.success() => Ok(result),
        Ok(result) => {
            warn!(
                target_name = %target,
                command = %command,
                status = result.status,
                "execution return code not 0, STDERR:\n======\n{}\n======",
                result.stderr
            );
            if ignore_error {
                Ok(CommandResult {
                    output: result.stderr.clone(),
                    ..result
                })
            } else {
                Err(ExecError::CommandFailed {
                    status: result.status,
                    stderr: result.stderr,
                })
            }
        }
        Err(e) => {
            error!(target_name = %target, command = %command, error = %e, "error executing command");
            if ignore_error {
                let text = e.to_string();
                Ok(CommandResult {
                    output: text.clone(),
                    status: LAUNCH_FAILURE_STATUS,
                    stderr: text,
                    duration: Duration::ZERO,
                })
            } else {
                Err(e)
            }
        }
    }
}
