//! User-facing message sink
//!
//! Core operations report dry-run summaries, progress and per-target results
//! through an injected [`Reporter`] so no library crate talks to a console.

use std::sync::Mutex;

use tracing::{info, warn};

/// Sink for user-facing messages
pub trait Reporter: Send + Sync {
    /// Report a normal progress or summary line
    fn info(&self, message: &str);
    /// Report a non-fatal problem
    fn warn(&self, message: &str);
}

/// Reporter that routes messages through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn info(&self, message: &str) {
        info!("{message}");
    }

    fn warn(&self, message: &str) {
        warn!("{message}");
    }
}

/// Reporter that captures messages in memory
///
/// Lets embedders and tests assert on what an operation reported.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    lines: Mutex<Vec<String>>,
}

impl MemoryReporter {
    /// Empty reporter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured lines, in order
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    /// Whether any captured line contains `needle`
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().unwrap().iter().any(|l| l.contains(needle))
    }
}

impl Reporter for MemoryReporter {
    fn info(&self, message: &str) {
        self.lines.lock().unwrap().push(message.to_string());
    }

    fn warn(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("warning: {message}"));
    }
}
