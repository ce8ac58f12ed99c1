//! Prometheus metrics.

use once_cell::sync::Lazy;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use gitd_repo::RepoError;

/// Transport a request arrived on.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Transport {
    /// Smart HTTP.
    Http,
    /// SSH.
    Ssh,
}

/// Result of a repository resolution.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    /// A new repository was initialized.
    Created,
    /// An existing repository was opened.
    Opened,
    /// The identifier failed sanitization.
    Rejected,
    /// The repository could not be created or opened.
    Failed,
}

impl Outcome {
    /// Classifies a resolution result.
    pub fn of(result: &gitd_repo::Result<gitd_repo::RepositoryHandle>) -> Self {
        match result {
            Ok(handle) if handle.was_created() => Outcome::Created,
            Ok(_) => Outcome::Opened,
            Err(RepoError::InvalidIdentifier { .. }) => Outcome::Rejected,
            Err(RepoError::Provisioning { .. }) => Outcome::Failed,
        }
    }
}

/// HTTP request labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    /// HTTP method.
    pub method: String,
    /// Route, with the repository part collapsed.
    pub path: String,
    /// Response status code.
    pub status: u16,
}

/// Repository resolution labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResolutionLabels {
    /// Transport that asked.
    pub transport: Transport,
    /// What happened.
    pub outcome: Outcome,
}

/// SSH authentication labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SshAuthLabels {
    /// `password` or `publickey`.
    pub method: String,
    /// `accepted` or `rejected`.
    pub result: String,
}

/// Process-wide metrics.
pub static METRICS: Lazy<MetricsState> = Lazy::new(MetricsState::new);

/// Every gitd metric, registered under the `gitd_` prefix.
pub struct MetricsState {
    registry: Registry,
    /// HTTP requests by method, route and status.
    pub http_requests_total: Family<HttpLabels, Counter>,
    /// HTTP latency in seconds.
    pub http_request_duration_seconds: Family<HttpLabels, Histogram>,
    /// In-flight HTTP requests.
    pub http_active_connections: Gauge,
    /// Repository resolutions.
    pub resolutions_total: Family<ResolutionLabels, Counter>,
    /// Accepted SSH connections.
    pub ssh_sessions_total: Counter,
    /// Open SSH connections.
    pub ssh_active_sessions: Gauge,
    /// SSH authentication attempts.
    pub ssh_auth_total: Family<SshAuthLabels, Counter>,
}

impl Default for MetricsState {
    fn default() -> Self {
        Self::new()
    }
}

fn latency_histogram() -> Histogram {
    // 1ms up to roughly 33s.
    Histogram::new(exponential_buckets(0.001, 2.0, 16))
}

impl MetricsState {
    /// Creates and registers every metric in a fresh registry.
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("gitd");
        let state = Self {
            http_requests_total: Family::default(),
            http_request_duration_seconds: Family::new_with_constructor(latency_histogram),
            http_active_connections: Gauge::default(),
            resolutions_total: Family::default(),
            ssh_sessions_total: Counter::default(),
            ssh_active_sessions: Gauge::default(),
            ssh_auth_total: Family::default(),
            registry: Registry::default(),
        };

        registry.register(
            "http_requests",
            "HTTP requests served",
            state.http_requests_total.clone(),
        );
        registry.register(
            "http_request_duration_seconds",
            "HTTP request latency",
            state.http_request_duration_seconds.clone(),
        );
        registry.register(
            "http_active_connections",
            "HTTP requests in flight",
            state.http_active_connections.clone(),
        );
        registry.register(
            "repository_resolutions",
            "Repository resolutions by transport and outcome",
            state.resolutions_total.clone(),
        );
        registry.register(
            "ssh_sessions",
            "SSH connections accepted",
            state.ssh_sessions_total.clone(),
        );
        registry.register(
            "ssh_active_sessions",
            "SSH connections open",
            state.ssh_active_sessions.clone(),
        );
        registry.register(
            "ssh_auth_attempts",
            "SSH authentication attempts by method and result",
            state.ssh_auth_total.clone(),
        );

        Self { registry, ..state }
    }

    /// Counts a served request and observes its latency, with the route
    /// collapsed by [`normalize_path`].
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let labels = HttpLabels {
            method: method.to_string(),
            path: normalize_path(path),
            status,
        };

        self.http_requests_total.get_or_create(&labels).inc();
        self.http_request_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Records a repository resolution.
    pub fn record_resolution(&self, transport: Transport, outcome: Outcome) {
        self.resolutions_total
            .get_or_create(&ResolutionLabels { transport, outcome })
            .inc();
    }

    /// Records an SSH authentication attempt.
    pub fn record_ssh_auth(&self, method: &str, accepted: bool) {
        let labels = SshAuthLabels {
            method: method.to_string(),
            result: if accepted { "accepted" } else { "rejected" }.to_string(),
        };
        self.ssh_auth_total.get_or_create(&labels).inc();
    }

    /// Renders the registry in the Prometheus text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut out = String::new();
        prometheus_client::encoding::text::encode(&mut out, &self.registry)?;
        Ok(out)
    }
}

/// Collapses repository identifiers so label cardinality stays bounded.
///
/// `/team/app.git/info/refs` becomes `/:repo/info/refs`.
fn normalize_path(path: &str) -> String {
    const GIT_SUFFIXES: [&str; 3] = ["/info/refs", "/git-upload-pack", "/git-receive-pack"];

    for suffix in GIT_SUFFIXES {
        if path.ends_with(suffix) && path.len() > suffix.len() {
            return format!("/:repo{suffix}");
        }
    }
    match path {
        "/health" | "/metrics" => path.to_string(),
        _ => "/:other".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/metrics"), "/metrics");
        assert_eq!(normalize_path("/team/app.git/info/refs"), "/:repo/info/refs");
        assert_eq!(normalize_path("/foo/git-upload-pack"), "/:repo/git-upload-pack");
        assert_eq!(normalize_path("/git-receive-pack"), "/:other");
        assert_eq!(normalize_path("/random/path"), "/:other");
    }

    #[test]
    fn test_encode_includes_recorded_series() {
        let metrics = MetricsState::new();
        metrics.record_http_request("GET", "/health", 200, 0.001);
        metrics.record_resolution(Transport::Ssh, Outcome::Created);
        metrics.record_ssh_auth("password", false);

        let encoded = metrics.encode().unwrap();
        assert!(encoded.contains("gitd_http_requests"));
        assert!(encoded.contains("transport=\"Ssh\""));
        assert!(encoded.contains("outcome=\"Created\""));
        assert!(encoded.contains("gitd_ssh_auth_attempts"));
    }
}
