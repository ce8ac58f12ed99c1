//! Repository resolution error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while resolving a repository identifier.
#[derive(Debug, Error)]
pub enum RepoError {
    /// The client-supplied identifier failed sanitization.
    #[error("invalid repository identifier {identifier:?}: {reason}")]
    InvalidIdentifier {
        /// The identifier as received from the transport.
        identifier: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The repository could not be created or opened.
    #[error("failed to provision repository at {}: {reason}", path.display())]
    Provisioning {
        /// Absolute path of the repository.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },
}

impl RepoError {
    pub(crate) fn invalid(identifier: &str, reason: &'static str) -> Self {
        Self::InvalidIdentifier {
            identifier: identifier.to_string(),
            reason,
        }
    }

    pub(crate) fn provisioning(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Provisioning {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if the error was caused by the client's input rather
    /// than by server-side state.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidIdentifier { .. })
    }
}

/// A specialized Result type for repository resolution.
pub type Result<T> = std::result::Result<T, RepoError>;
