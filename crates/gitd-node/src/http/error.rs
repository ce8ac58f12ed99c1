//! HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use gitd_git::GitError;
use gitd_repo::RepoError;
use serde::Serialize;

/// Errors returned by the smart HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The identifier was rejected; the client learns nothing more.
    #[error("repository not available")]
    RepositoryNotAvailable,
    /// The repository exists in an unusable state or could not be created.
    #[error("service not enabled")]
    Unavailable,
    /// The requested git service is switched off or unknown.
    #[error("service not enabled")]
    ServiceNotEnabled,
    /// Anything other than `info/refs` and the two RPC endpoints.
    #[error("not found")]
    NotFound,
    /// The request body could not be decoded.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// The request body, once inflated, is larger than allowed.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge {
        /// Configured limit.
        limit: usize,
    },
    /// The git process failed.
    #[error("git error: {0}")]
    Git(#[from] GitError),
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::InvalidIdentifier { .. } => ApiError::RepositoryNotAvailable,
            RepoError::Provisioning { .. } => ApiError::Unavailable,
        }
    }
}

impl ApiError {
    /// Status code sent to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::RepositoryNotAvailable | ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::ServiceNotEnabled => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Git(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Process details stay in the logs.
            ApiError::Git(e) => {
                tracing::error!(error = %e, "Git service failed");
                "git service failed".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitd_repo::RepositoryRoot;

    #[test]
    fn test_repo_error_mapping() {
        let root = RepositoryRoot::new("/srv/git").unwrap();
        let invalid = root.sanitize("../../etc").unwrap_err();
        assert_eq!(ApiError::from(invalid).status(), StatusCode::NOT_FOUND);

        let failed = RepoError::Provisioning {
            path: "/srv/git/foo.git".into(),
            reason: "not a git repository".to_string(),
        };
        let err = ApiError::from(failed);
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.to_string(), "service not enabled");
    }

    #[test]
    fn test_disabled_service_is_forbidden() {
        assert_eq!(ApiError::ServiceNotEnabled.status(), StatusCode::FORBIDDEN);
    }
}
