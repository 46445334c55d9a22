//! Error types for the copy engine

use omnirun_exec::ExecError;
use omnirun_inventory::ResolveError;
use thiserror::Error;

/// Errors that can occur while planning or executing a copy
#[derive(Error, Debug)]
pub enum CopyError {
    /// Missing or conflicting arguments
    #[error("{0}")]
    Validation(String),

    /// Endpoint specifier could not be resolved
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Directory source without the recursive flag
    #[error("{path}: is a directory (use --recursive to copy directories)")]
    IsDirectory {
        /// The directory that was named as a source
        path: String,
    },

    /// An explicitly named source file does not exist
    #[error("source not found: {0}")]
    SourceMissing(String),

    /// Backend failure outside an individual transfer
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// A single-file transfer failed
    #[error("failed to copy {path}: {message}")]
    Transfer {
        /// Source path of the failed transfer
        path: String,
        /// What went wrong
        message: String,
    },
}
