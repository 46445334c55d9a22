//! Option types shared by every adapter

use std::time::Duration;

/// Options for [`crate::traits::Adapter::run`] and [`crate::traits::Adapter::stream`]
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Working directory for the command
    pub cwd: Option<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Kill the command and fail if it runs longer than this
    pub timeout: Option<Duration>,
    /// Turn a non-zero exit into an error (default true)
    pub check: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            env: Vec::new(),
            timeout: None,
            check: true,
        }
    }
}

impl RunOptions {
    /// Options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set working directory
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add an environment variable
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set a timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Report non-zero exits as data instead of an error
    #[must_use]
    pub fn unchecked(mut self) -> Self {
        self.check = false;
        self
    }
}

/// Options for upload and download
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferOptions {
    /// Recurse into directories
    pub recursive: bool,
    /// Carry modification time and permission bits to the destination
    pub preserve: bool,
}

impl TransferOptions {
    /// Options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable recursion
    #[must_use]
    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    /// Enable metadata preservation
    #[must_use]
    pub fn preserve(mut self) -> Self {
        self.preserve = true;
        self
    }
}

/// Options for file listings
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Descend into subdirectories
    pub recursive: bool,
}

impl ListOptions {
    /// Options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable recursion
    #[must_use]
    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }
}
