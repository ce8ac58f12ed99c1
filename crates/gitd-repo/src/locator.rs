//! Transport-agnostic repository resolution.

use crate::path::{RepositoryPath, RepositoryRoot};
use crate::provision::{RepositoryHandle, RepositoryProvisioner};
use crate::{RepoError, Result};
use std::sync::Arc;

/// Sanitizes an identifier and provisions the repository it names.
///
/// Every transport adapter goes through the same locator, so an identifier
/// maps to one on-disk location no matter how it arrived.
#[derive(Debug, Clone)]
pub struct RepositoryLocator {
    root: Arc<RepositoryRoot>,
    provisioner: Arc<RepositoryProvisioner>,
}

impl RepositoryLocator {
    /// Creates a locator over `root`.
    pub fn new(root: RepositoryRoot, provisioner: RepositoryProvisioner) -> Self {
        Self {
            root: Arc::new(root),
            provisioner: Arc::new(provisioner),
        }
    }

    /// The repository root this locator serves.
    pub fn root(&self) -> &RepositoryRoot {
        &self.root
    }

    /// The provisioner shared by all adapters.
    pub fn provisioner(&self) -> &RepositoryProvisioner {
        &self.provisioner
    }

    /// Sanitizes an identifier without touching the filesystem.
    pub fn locate(&self, identifier: &str) -> Result<RepositoryPath> {
        self.root.sanitize(identifier)
    }

    /// Resolves an identifier to an existing bare repository, creating it if
    /// nothing exists at its path yet. Blocks on filesystem work.
    pub fn resolve(&self, identifier: &str) -> Result<RepositoryHandle> {
        let path = self.root.sanitize(identifier).inspect_err(|e| {
            tracing::warn!(identifier = %identifier, error = %e, "Rejected repository identifier");
        })?;
        self.provisioner.ensure(&path)
    }

    /// Runs [`resolve`](Self::resolve) on the blocking thread pool.
    pub async fn resolve_async(&self, identifier: &str) -> Result<RepositoryHandle> {
        let locator = self.clone();
        let owned = identifier.to_string();
        tokio::task::spawn_blocking(move || locator.resolve(&owned))
            .await
            .map_err(|e| RepoError::Provisioning {
                path: self.root.path().to_path_buf(),
                reason: format!("resolution task failed: {e}"),
            })?
    }
}
