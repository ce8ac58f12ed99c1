//! Smart HTTP endpoints.
//!
//! See: https://git-scm.com/docs/http-protocol

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use futures_util::StreamExt;
use gitd_git::{GitError, Mode, Service};
use serde::Deserialize;
use std::io::Read;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio_util::io::ReaderStream;

use super::error::ApiError;
use super::locator::split_endpoint;
use super::HttpState;

/// Request header carrying the client's protocol version.
const GIT_PROTOCOL_HEADER: &str = "git-protocol";

#[derive(Debug, Deserialize)]
pub(super) struct InfoRefsQuery {
    service: Option<String>,
}

/// `GET /health`.
pub(super) async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// `GET /{repo}/info/refs?service=...`
pub(super) async fn git_get(
    State(state): State<HttpState>,
    Path(path): Path<String>,
    Query(query): Query<InfoRefsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let Some((identifier, "/info/refs")) = split_endpoint(&path) else {
        return Err(ApiError::NotFound);
    };

    // Dumb HTTP is not served.
    let service = query
        .service
        .as_deref()
        .ok_or(ApiError::ServiceNotEnabled)?
        .parse::<Service>()
        .map_err(|_| ApiError::ServiceNotEnabled)?;
    state.require_enabled(service)?;

    let handle = state.locator.open(identifier).await?;
    let protocol = git_protocol(&headers);
    let body = gitd_git::advertise_refs(handle.path(), service, protocol.as_deref()).await?;

    Ok(no_cache(
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, service.advertisement_content_type()),
    )
    .body(Body::from(body))
    .map_err(|e| GitError::Io(std::io::Error::other(e)))?)
}

/// `POST /{repo}/git-upload-pack` and `POST /{repo}/git-receive-pack`.
pub(super) async fn git_post(
    State(state): State<HttpState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let (identifier, service) = match split_endpoint(&path) {
        Some((identifier, "/git-upload-pack")) => (identifier, Service::UploadPack),
        Some((identifier, "/git-receive-pack")) => (identifier, Service::ReceivePack),
        _ => return Err(ApiError::NotFound),
    };
    state.require_enabled(service)?;

    let handle = state.locator.open(identifier).await?;

    let body = if is_gzip(&headers) {
        let compressed = axum::body::to_bytes(body, state.max_request_bytes)
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        Body::from(inflate(compressed, state.max_request_bytes).await?)
    } else {
        body
    };

    let protocol = git_protocol(&headers);
    let mut child = gitd_git::spawn(
        handle.path(),
        service,
        Mode::StatelessRpc,
        protocol.as_deref(),
    )?;

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(GitError::Io(std::io::Error::other("git process pipes not captured")).into());
    };

    tokio::spawn(feed_stdin(stdin, body));
    tokio::spawn(reap(child, service));

    Ok(no_cache(
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, service.result_content_type()),
    )
    .body(Body::from_stream(ReaderStream::new(stdout)))
    .map_err(|e| GitError::Io(std::io::Error::other(e)))?)
}

fn no_cache(builder: axum::http::response::Builder) -> axum::http::response::Builder {
    builder
        .header(header::CACHE_CONTROL, "no-cache, max-age=0, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "Fri, 01 Jan 1980 00:00:00 GMT")
}

fn git_protocol(headers: &HeaderMap) -> Option<String> {
    headers
        .get(GIT_PROTOCOL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip") || v.eq_ignore_ascii_case("x-gzip"))
}

/// Inflates a gzip body, refusing output larger than `limit`.
async fn inflate(compressed: Bytes, limit: usize) -> Result<Bytes, ApiError> {
    tokio::task::spawn_blocking(move || {
        let mut decoded = Vec::new();
        let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
        flate2::read::GzDecoder::new(compressed.as_ref())
            .take(cap)
            .read_to_end(&mut decoded)
            .map_err(|e| ApiError::BadRequest(format!("invalid gzip body: {e}")))?;
        if decoded.len() > limit {
            tracing::warn!(
                compressed = compressed.len(),
                limit,
                "Rejected gzip body over the inflated size limit"
            );
            return Err(ApiError::PayloadTooLarge { limit });
        }
        Ok(Bytes::from(decoded))
    })
    .await
    .map_err(|e| ApiError::BadRequest(format!("gzip decoding failed: {e}")))?
}

/// Copies the request body into the service's stdin, then closes it.
async fn feed_stdin(mut stdin: ChildStdin, body: Body) {
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, "Request body aborted");
                return;
            }
        };
        if let Err(e) = stdin.write_all(&chunk).await {
            tracing::debug!(error = %e, "Git process closed stdin early");
            return;
        }
    }
    if let Err(e) = stdin.shutdown().await {
        tracing::debug!(error = %e, "Failed to close git stdin");
    }
}

/// Waits for the service to exit and logs a failure with its stderr.
async fn reap(mut child: Child, service: Service) {
    let mut stderr = Vec::new();
    if let Some(mut pipe) = child.stderr.take() {
        let _ = pipe.read_to_end(&mut stderr).await;
    }

    match child.wait().await {
        Ok(status) if status.success() => {
            tracing::debug!(service = %service, "Git service finished");
        }
        Ok(status) => {
            tracing::warn!(
                service = %service,
                status = %status,
                stderr = %String::from_utf8_lossy(&stderr).trim(),
                "Git service failed"
            );
        }
        Err(e) => {
            tracing::error!(service = %service, error = %e, "Failed to wait for git service");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_git_protocol_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(git_protocol(&headers), None);
        headers.insert("git-protocol", HeaderValue::from_static("version=2"));
        assert_eq!(git_protocol(&headers).as_deref(), Some("version=2"));
    }

    #[test]
    fn test_is_gzip() {
        let mut headers = HeaderMap::new();
        assert!(!is_gzip(&headers));
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("GZIP"));
        assert!(is_gzip(&headers));
    }

    fn gzip(data: &[u8]) -> Bytes {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        Bytes::from(encoder.finish().unwrap())
    }

    #[tokio::test]
    async fn test_inflate() {
        let compressed = gzip(b"0032want 0000000000000000000000000000000000000000\n");
        let decoded = inflate(compressed, 1024).await.unwrap();
        assert!(decoded.starts_with(b"0032want "));

        let err = inflate(Bytes::from_static(b"not gzip"), 1024).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_inflate_stops_at_limit() {
        // 16 MiB of zeros compresses to a few KiB.
        let compressed = gzip(&vec![0u8; 16 * 1024 * 1024]);
        assert!(compressed.len() < 64 * 1024);

        let err = inflate(compressed.clone(), 1024 * 1024).await.unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge { limit } if limit == 1024 * 1024));
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let exact = inflate(compressed, 16 * 1024 * 1024).await.unwrap();
        assert_eq!(exact.len(), 16 * 1024 * 1024);
    }
}
