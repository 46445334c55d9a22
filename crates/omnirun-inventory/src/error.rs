//! Error types for target resolution

use thiserror::Error;

/// Errors that can occur while resolving target specifiers
#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    /// Specifier does not follow the `local` / `group.name` grammar
    #[error("invalid target specifier: {0}")]
    InvalidSpecifier(String),

    /// An explicitly named target does not exist in the inventory
    #[error("target not found: {0}")]
    NotFound(String),

    /// A specifier that must name a single target matched several
    #[error("specifier matches multiple targets: {0}")]
    Ambiguous(String),

    /// Name pattern is not a valid glob
    #[error("invalid pattern {pattern:?}: {message}")]
    Pattern {
        /// The offending pattern
        pattern: String,
        /// Underlying glob error
        message: String,
    },
}
