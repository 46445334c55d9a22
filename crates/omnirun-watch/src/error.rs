//! Error types for the watch engine

use omnirun_exec::ExecError;
use omnirun_inventory::ResolveError;
use thiserror::Error;

/// Errors that can occur while starting or stopping watch sessions
#[derive(Error, Debug)]
pub enum WatchError {
    /// Neither or both of command/task were given
    #[error("Either --command or --task must be specified")]
    MissingAction,

    /// No target specifier was given
    #[error("Target specification is required")]
    MissingTarget,

    /// A session already exists for this target id
    #[error("Already watching target: {0}")]
    AlreadyWatching(String),

    /// No session exists for this target id
    #[error("not watching target: {0}")]
    NotWatching(String),

    /// The named task is not defined
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// Target specifier could not be resolved
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Backend failure while setting a session up
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Native filesystem watcher failure
    #[error("watcher error: {0}")]
    Watcher(String),
}
