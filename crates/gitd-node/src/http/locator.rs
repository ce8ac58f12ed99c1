//! Repository resolution for smart HTTP requests.

use gitd_repo::{RepositoryHandle, RepositoryLocator};

use super::error::ApiError;
use crate::observability::{Outcome, Transport, METRICS};

/// Suffixes that end the repository part of a smart HTTP URL.
const ENDPOINTS: [&str; 3] = ["/info/refs", "/git-upload-pack", "/git-receive-pack"];

/// Resolves the repository named by a smart HTTP URL.
#[derive(Debug, Clone)]
pub struct HttpRepositoryLocator {
    inner: RepositoryLocator,
}

impl HttpRepositoryLocator {
    /// Wraps the shared locator.
    pub fn new(inner: RepositoryLocator) -> Self {
        Self { inner }
    }

    /// Opens (creating if needed) the repository called `name`.
    ///
    /// Sanitization failures become `404`, provisioning failures `503`.
    pub async fn open(&self, name: &str) -> Result<RepositoryHandle, ApiError> {
        let result = self.inner.resolve_async(name).await;
        METRICS.record_resolution(Transport::Http, Outcome::of(&result));

        match result {
            Ok(handle) => {
                tracing::debug!(
                    name = %name,
                    path = %handle.path().display(),
                    created = handle.was_created(),
                    "Resolved repository over HTTP"
                );
                Ok(handle)
            }
            Err(e) => {
                if !e.is_client_error() {
                    tracing::error!(name = %name, error = %e, "Failed to open repository");
                }
                Err(e.into())
            }
        }
    }
}

/// Splits a request path into the repository identifier and the endpoint,
/// e.g. `team/app.git/info/refs` into `("team/app.git", "/info/refs")`.
pub fn split_endpoint(path: &str) -> Option<(&str, &'static str)> {
    ENDPOINTS.iter().find_map(|endpoint| {
        path.strip_suffix(endpoint)
            .map(|identifier| (identifier, *endpoint))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use gitd_repo::{RepositoryProvisioner, RepositoryRoot};

    #[test]
    fn test_split_endpoint() {
        assert_eq!(
            split_endpoint("team/app.git/info/refs"),
            Some(("team/app.git", "/info/refs"))
        );
        assert_eq!(
            split_endpoint("foo/git-upload-pack"),
            Some(("foo", "/git-upload-pack"))
        );
        assert_eq!(
            split_endpoint("/foo/git-receive-pack"),
            Some(("/foo", "/git-receive-pack"))
        );
        assert_eq!(split_endpoint("foo/HEAD"), None);
        assert_eq!(split_endpoint("info/refs"), None);
    }

    #[tokio::test]
    async fn test_open_maps_errors() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = RepositoryRoot::prepare(temp.path()).unwrap();
        std::fs::create_dir(root.path().join("empty.git")).unwrap();
        let locator =
            HttpRepositoryLocator::new(RepositoryLocator::new(root, RepositoryProvisioner::new()));

        let handle = locator.open("foo").await.unwrap();
        assert!(handle.was_created());

        let err = locator.open("../../etc").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = locator.open("empty").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
