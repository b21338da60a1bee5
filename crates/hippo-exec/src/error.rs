//! Error types for hippo-exec

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while executing commands or moving files on a target
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Failed to connect to remote host
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Command exited with a non-zero status
    #[error("command execution failed: {status} - {stderr}")]
    CommandFailed {
        /// Exit status code
        status: i32,
        /// Stderr output
        stderr: String,
    },

    /// Command or connection attempt timed out
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// SSH key error
    #[error("SSH key error: {0}")]
    SshKeyError(String),

    /// Process spawn error
    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    /// I/O error during execution
    #[error("I/O error: {0}")]
    IoError(String),

    /// Connection not established or already closed
    #[error("not connected")]
    NotConnected,

    /// File transfer failed
    #[error("transfer failed: {0}")]
    TransferFailed(String),
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::IoError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_display() {
        let err = ExecError::CommandFailed {
            status: 42,
            stderr: "boom".into(),
        };
        assert_eq!(err.to_string(), "command execution failed: 42 - boom");
    }

    #[test]
    fn test_from_io_error() {
        let err: ExecError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, ExecError::IoError(ref m) if m == "gone"));
    }
}
