//! Git service error types.

use std::process::ExitStatus;
use thiserror::Error;

/// Errors that can occur while running a git pack service.
#[derive(Debug, Error)]
pub enum GitError {
    /// The git binary could not be started.
    #[error("failed to spawn git {command}: {source}")]
    Spawn {
        /// Subcommand that was being started.
        command: &'static str,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The git process exited unsuccessfully.
    #[error("git {command} exited with {status}: {stderr}")]
    Failed {
        /// Subcommand that failed.
        command: &'static str,
        /// Exit status of the process.
        status: ExitStatus,
        /// Captured standard error.
        stderr: String,
    },

    /// Unknown service name.
    #[error("unsupported service: {0}")]
    UnknownService(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
