//! Error types for adapter operations

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while executing commands or moving files
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Failed to establish a backend session
    #[error("connection failed: {0}")]
    Connection(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Command exited with a non-zero status
    #[error("command failed with status {status}: {stderr}")]
    CommandFailed {
        /// Exit status code
        status: i32,
        /// Captured stderr
        stderr: String,
    },

    /// Command timed out; the underlying process was terminated
    #[error("command timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Process spawn error
    #[error("failed to spawn process: {0}")]
    Spawn(String),

    /// I/O failure during upload or download
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Other I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Connection not established
    #[error("not connected")]
    NotConnected,
}

impl ExecError {
    /// Whether this error means the target could not be reached at all
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, ExecError::Connection(_) | ExecError::Auth(_))
    }
}
