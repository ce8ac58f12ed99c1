//! # Smart HTTP transport
//!
//! Routes:
//!
//! | Method | Path | |
//! |--------|------|-|
//! | GET | `/{repo}/info/refs?service=git-upload-pack\|git-receive-pack` | ref advertisement |
//! | POST | `/{repo}/git-upload-pack` | fetch and clone |
//! | POST | `/{repo}/git-receive-pack` | push (disabled by default) |
//! | GET | `/health` | liveness |
//! | GET | `/metrics` | Prometheus text |
//!
//! `{repo}` is everything before the endpoint and may contain slashes.

mod error;
mod handlers;
mod locator;

pub use error::ApiError;
pub use locator::{split_endpoint, HttpRepositoryLocator};

use axum::{routing::get, Router};
use gitd_git::Service;
use gitd_repo::RepositoryLocator;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::HttpConfig;
use crate::observability::{metrics_handler, metrics_middleware, request_id_middleware};

/// Default limit on a gzip request body, both compressed and inflated.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 512 * 1024 * 1024;

/// Shared state for the smart HTTP handlers.
#[derive(Debug, Clone)]
pub struct HttpState {
    /// Repository resolution.
    pub locator: HttpRepositoryLocator,
    /// Serve `git-upload-pack`.
    pub upload_pack: bool,
    /// Serve `git-receive-pack`.
    pub receive_pack: bool,
    /// Limit on gzip request bodies, applied before and after inflation.
    pub max_request_bytes: usize,
}

impl HttpState {
    /// Builds state from the shared locator and HTTP settings.
    pub fn new(locator: RepositoryLocator, config: &HttpConfig) -> Self {
        Self {
            locator: HttpRepositoryLocator::new(locator),
            upload_pack: config.upload_pack,
            receive_pack: config.receive_pack,
            max_request_bytes: config.max_request_bytes,
        }
    }

    fn require_enabled(&self, service: Service) -> Result<(), ApiError> {
        let enabled = match service {
            Service::UploadPack => self.upload_pack,
            Service::ReceivePack => self.receive_pack,
        };
        if enabled {
            Ok(())
        } else {
            tracing::warn!(service = %service, "Rejected request for disabled service");
            Err(ApiError::ServiceNotEnabled)
        }
    }
}

/// Creates the smart HTTP router.
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(metrics_handler))
        .route("/{*path}", get(handlers::git_get).post(handlers::git_post))
        .layer(axum::middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Serves `router` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
