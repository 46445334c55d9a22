//! Error types for project configuration

use thiserror::Error;

/// Errors that can occur while loading the project file
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The named config file does not exist
    #[error("config file not found: {0}")]
    NotFound(String),

    /// The file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed to read
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or violates the schema
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// File that failed to parse
        path: String,
        /// TOML error rendered with position context
        message: String,
    },
}
