//! Result types for command execution and file listings

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::ExecError;

/// Result of a command execution, uniform across backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    /// Exit status code (0 for success)
    pub status: i32,
    /// stdout output
    pub stdout: String,
    /// stderr output
    pub stderr: String,
    /// Time taken to execute
    pub duration: Duration,
}

impl ExecResult {
    /// Check if the command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Combine stdout and stderr
    #[must_use]
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Turn a non-zero exit into [`ExecError::CommandFailed`]
    ///
    /// # Errors
    /// Returns `CommandFailed` carrying the status and captured stderr.
    pub fn check(self) -> Result<Self, ExecError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ExecError::CommandFailed {
                status: self.status,
                stderr: self.stderr,
            })
        }
    }
}

/// One file or directory returned by a listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path as reported by the backend
    pub path: String,
    /// Whether the entry is a directory
    pub is_dir: bool,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Modification time
    pub mtime: SystemTime,
    /// Unix permission bits, where the backend exposes them
    pub mode: Option<u32>,
}

impl FileEntry {
    /// File name component of the path
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.path)
    }
}
