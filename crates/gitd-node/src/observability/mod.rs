//! # Observability
//!
//! - **Structured logging**: pretty or JSON output via `tracing-subscriber`
//! - **Prometheus metrics**: HTTP requests, repository resolutions, SSH
//!   sessions and authentication results
//! - **Request IDs**: an `x-request-id` span around every HTTP request
//!
//! ```rust,ignore
//! use gitd_node::observability::{init_logging, request_id_middleware, LogFormat};
//!
//! init_logging("info", LogFormat::Json);
//! let app: axum::Router =
//!     axum::Router::new().layer(axum::middleware::from_fn(request_id_middleware));
//! ```

mod logging;
mod metrics;
pub mod middleware;

pub use logging::{init_logging, LogFormat};
pub use metrics::{MetricsState, Outcome, Transport, METRICS};
pub use middleware::{
    metrics_handler, metrics_middleware, request_id_middleware, RequestId, REQUEST_ID_HEADER,
};
