//! HTTP client wrapper shared by registry API calls and file transfers.
//!
//! Every request goes through the per-host [`RateLimiter`] first, so pacing
//! holds for listing pages, version lookups, HEAD requests and downloads alike.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_LENGTH, RANGE, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use super::DownloadError;
use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, WRITE_BUFFER_BYTES};
use super::rate_limiter::{RateLimiter, parse_retry_after};
use crate::user_agent;

/// Transport settings for [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Per-request timeout covering the whole response body.
    pub read_timeout: Duration,
    /// User-Agent sent with every request.
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            user_agent: user_agent::default_user_agent(),
        }
    }
}

/// What a HEAD request revealed about a remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteInfo {
    /// Remote size in bytes, `None` when the server did not say.
    pub size: Option<u64>,
}

/// HTTP client for registry APIs and streaming downloads.
///
/// Create once per run and clone freely; clones share the connection pool
/// and the rate limiter.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use registry_mirror::download::{HttpClient, HttpSettings, RateLimiter};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = Arc::new(RateLimiter::new(std::time::Duration::from_secs(1)));
/// let client = HttpClient::new(&HttpSettings::default(), limiter)?;
/// let info = client.remote_info("https://static.crates.io/crates/serde/serde-1.0.0.crate").await?;
/// println!("remote size: {:?}", info.size);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    limiter: Arc<RateLimiter>,
}

impl HttpClient {
    /// Builds a client with the given settings and shared rate limiter.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error when the TLS backend cannot be
    /// initialised.
    pub fn new(settings: &HttpSettings, limiter: Arc<RateLimiter>) -> Result<Self, reqwest::Error> {
        let client = build_client(settings)?;
        Ok(Self { client, limiter })
    }

    /// Sends a HEAD request and reports the remote size.
    ///
    /// Servers that reject HEAD (405/501) yield an unknown size rather than an
    /// error so the caller can fall back to a full transfer.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::HttpStatus`] for other error statuses (including
    /// 404/410) and network/timeout errors.
    #[instrument(level = "debug", skip(self))]
    pub async fn remote_info(&self, url: &str) -> Result<RemoteInfo, DownloadError> {
        let response = match self.send(Method::HEAD, url, None).await {
            Ok(response) => response,
            Err(DownloadError::HttpStatus {
                status: 405 | 501,
                ..
            }) => {
                debug!(url, "HEAD not supported, remote size unknown");
                return Ok(RemoteInfo::default());
            }
            Err(error) => return Err(error),
        };

        let info = RemoteInfo {
            // `Response::content_length` reports the (empty) body of a HEAD reply.
            size: header_u64(&response, CONTENT_LENGTH),
        };
        debug!(url, size = ?info.size, "remote file size");
        Ok(info)
    }

    /// Fetches a URL and decodes the JSON body.
    ///
    /// # Errors
    ///
    /// Returns network, status or [`DownloadError::Decode`] errors.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, DownloadError> {
        let response = self.send(Method::GET, url, None).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;
        serde_json::from_slice(&body).map_err(|e| DownloadError::decode(url, e))
    }

    /// Fetches a URL as text.
    ///
    /// # Errors
    ///
    /// Returns network or status errors.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_text(&self, url: &str) -> Result<String, DownloadError> {
        let response = self.send(Method::GET, url, None).await?;
        response.text().await.map_err(|e| map_reqwest_error(url, e))
    }

    /// Starts a file transfer, optionally from byte `range_start` onwards.
    ///
    /// The caller inspects the status: `206` means the server honoured the
    /// range, `200` means the full body follows.
    ///
    /// # Errors
    ///
    /// Returns network or status errors.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_file(
        &self,
        url: &str,
        range_start: Option<u64>,
    ) -> Result<reqwest::Response, DownloadError> {
        let range = range_start.map(|start| format!("bytes={start}-"));
        self.send(Method::GET, url, range.as_deref()).await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        range_header: Option<&str>,
    ) -> Result<reqwest::Response, DownloadError> {
        let parsed = url::Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        self.limiter.acquire(url).await;

        let mut request = self.client.request(method, parsed);
        if let Some(range) = range_header {
            // Byte offsets refer to the stored representation, never a re-encoded one.
            request = request
                .header(RANGE, range)
                .header(ACCEPT_ENCODING, "identity");
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if status == StatusCode::TOO_MANY_REQUESTS
            && let Some(delay) = retry_after.as_deref().and_then(parse_retry_after)
        {
            self.limiter.record_rate_limit(url, delay).await;
        }

        Err(DownloadError::http_status_with_retry_after(
            url,
            status.as_u16(),
            retry_after,
        ))
    }
}

/// Streams a response body to `file`, returning the bytes written.
///
/// The body is written chunk by chunk through a buffered writer and flushed
/// before returning; it is never held in memory as a whole.
pub(crate) async fn stream_to_file(
    file: File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_BYTES, file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| map_reqwest_error(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path, e))?;
    writer
        .get_ref()
        .sync_all()
        .await
        .map_err(|e| DownloadError::io(file_path, e))?;

    Ok(bytes_written)
}

/// Total size announced by a transfer response.
///
/// For `206` replies the `Content-Length` covers only the remainder, so the
/// offset is added back.
pub(crate) fn announced_total(response: &reqwest::Response, range_start: u64) -> Option<u64> {
    let current = header_u64(response, CONTENT_LENGTH);
    if response.status() == StatusCode::PARTIAL_CONTENT {
        current.map(|remaining| range_start.saturating_add(remaining))
    } else {
        current
    }
}

fn header_u64(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn map_reqwest_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}

fn build_client(settings: &HttpSettings) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.read_timeout)
        .gzip(true)
        .user_agent(settings.user_agent.clone())
        .build()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn test_client() -> HttpClient {
        HttpClient::new(&HttpSettings::default(), Arc::new(RateLimiter::disabled())).unwrap()
    }

    #[test]
    fn test_http_settings_default_uses_constants() {
        let settings = HttpSettings::default();
        assert_eq!(settings.connect_timeout, Duration::from_secs(30));
        assert_eq!(settings.read_timeout, Duration::from_secs(300));
        assert!(settings.user_agent.starts_with("registry-mirror/"));
    }

    #[tokio::test]
    async fn test_remote_info_reads_content_length_header() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("HEAD"))
            .and(path("/lib-1.0.jar"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Accept-Ranges", "bytes")
                    .set_body_bytes(vec![0u8; 1024]),
            )
            .mount(&mock_server)
            .await;

        let info = test_client()
            .remote_info(&format!("{}/lib-1.0.jar", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(info, RemoteInfo { size: Some(1024) });
    }

    #[tokio::test]
    async fn test_remote_info_head_not_allowed_means_unknown_size() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("HEAD"))
            .and(path("/no-head"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&mock_server)
            .await;

        let info = test_client()
            .remote_info(&format!("{}/no-head", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(info.size, None);
    }

    #[tokio::test]
    async fn test_remote_info_not_found_is_error() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("HEAD"))
            .and(path("/missing.pom"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let error = test_client()
            .remote_info(&format!("{}/missing.pom", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(error.is_not_found());
    }

    #[tokio::test]
    async fn test_get_json_decodes_body() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/api/v1/crates"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"crates": [], "meta": {"next_page": null}})),
            )
            .mount(&mock_server)
            .await;

        let value: serde_json::Value = test_client()
            .get_json(&format!("{}/api/v1/crates", mock_server.uri()))
            .await
            .unwrap();
        assert!(value["meta"]["next_page"].is_null());
    }

    #[tokio::test]
    async fn test_get_json_invalid_body_is_decode_error() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&mock_server)
            .await;

        let result: Result<serde_json::Value, _> = test_client()
            .get_json(&format!("{}/broken", mock_server.uri()))
            .await;
        assert!(matches!(result, Err(DownloadError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_get_file_sends_range_header() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/a.crate"))
            .and(header("range", "bytes=512-"))
            .respond_with(
                ResponseTemplate::new(206)
                    .set_body_bytes(vec![1u8; 512]),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let response = test_client()
            .get_file(&format!("{}/a.crate", mock_server.uri()), Some(512))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(announced_total(&response, 512), Some(1024));
    }

    #[tokio::test]
    async fn test_status_error_carries_retry_after() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
            .mount(&mock_server)
            .await;

        let error = test_client()
            .get_file(&format!("{}/busy", mock_server.uri()), None)
            .await
            .unwrap_err();
        match error {
            DownloadError::HttpStatus {
                status, retry_after, ..
            } => {
                assert_eq!(status, 429);
                assert_eq!(retry_after.as_deref(), Some("1"));
            }
            other => panic!("expected HttpStatus, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_url_rejected_before_request() {
        let error = tokio_test::block_on(test_client().remote_info("not a url")).unwrap_err();
        assert!(matches!(error, DownloadError::InvalidUrl { .. }));
    }
}
