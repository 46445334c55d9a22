//! Error types for dispatch

use omnirun_inventory::ResolveError;
use thiserror::Error;

/// Errors that stop a dispatch before any target runs
///
/// Per-target failures never surface here; they are collected in the
/// [`crate::DispatchReport`] so sibling targets still run.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Missing or malformed arguments
    #[error("{0}")]
    Validation(String),

    /// Target specifier could not be resolved
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}
