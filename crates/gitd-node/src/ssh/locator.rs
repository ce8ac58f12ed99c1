//! Repository resolution for SSH exec requests.

use gitd_repo::{RepoError, RepositoryLocator};
use std::io;
use std::path::PathBuf;

use crate::observability::{Outcome, Transport, METRICS};

/// Resolves the repository named by an SSH exec command.
#[derive(Debug, Clone)]
pub struct SshRepositoryLocator {
    inner: RepositoryLocator,
}

impl SshRepositoryLocator {
    /// Wraps the shared locator.
    pub fn new(inner: RepositoryLocator) -> Self {
        Self { inner }
    }

    /// Returns the repository directory for `command`, creating the
    /// repository on first access.
    ///
    /// `args[0]` is the identifier. Errors are reported as
    /// [`io::ErrorKind::InvalidInput`] for bad input and
    /// [`io::ErrorKind::Other`] when the repository cannot be provisioned.
    pub async fn resolve_root_directory(
        &self,
        command: &str,
        args: &[String],
    ) -> io::Result<PathBuf> {
        let Some(identifier) = args.first() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "No repository path specified",
            ));
        };

        let result = self.inner.resolve_async(identifier).await;
        METRICS.record_resolution(Transport::Ssh, Outcome::of(&result));

        match result {
            Ok(handle) => {
                tracing::info!(
                    command = %command,
                    identifier = %identifier,
                    path = %handle.path().display(),
                    created = handle.was_created(),
                    "Resolved repository over SSH"
                );
                Ok(handle.path().to_path_buf())
            }
            Err(e @ RepoError::InvalidIdentifier { .. }) => {
                Err(io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
            }
            Err(e @ RepoError::Provisioning { .. }) => {
                tracing::error!(identifier = %identifier, error = %e, "Failed to provision repository");
                Err(io::Error::other(format!(
                    "repository '{identifier}' is not available"
                )))
            }
        }
    }
}
