//! Error types for the download module.
//!
//! Every variant carries the URL or path it failed on so a log line is enough
//! to find the unit that needs another run.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while talking to a registry or fetching a file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429/503 responses).
        retry_after: Option<String>,
    },

    /// File system error while preparing or writing the destination.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Local file size does not match the remote size after a transfer.
    #[error(
        "integrity check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Integrity {
        /// Download path that failed verification.
        path: PathBuf,
        /// Expected size in bytes.
        expected_bytes: u64,
        /// Actual size in bytes.
        actual_bytes: u64,
    },

    /// A registry API response could not be decoded.
    #[error("unexpected response body from {url}: {source}")]
    Decode {
        /// The URL whose body failed to decode.
        url: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A retryable error persisted through every allowed attempt.
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error returned by the final attempt.
        #[source]
        source: Box<DownloadError>,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an integrity mismatch error.
    pub fn integrity(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates a body decoding error.
    pub fn decode(url: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            url: url.into(),
            source,
        }
    }

    /// Wraps the final error of an exhausted retry loop.
    #[must_use]
    pub fn retries_exhausted(attempts: u32, source: DownloadError) -> Self {
        Self::RetriesExhausted {
            attempts,
            source: Box::new(source),
        }
    }

    /// Returns true when the remote resource does not exist (404/410).
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::HttpStatus { status: 404 | 410, .. })
    }

    /// Returns true for local filesystem failures.
    #[must_use]
    pub fn is_local_io(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::RetriesExhausted { source, .. } => source.is_local_io(),
            _ => false,
        }
    }

    /// Number of attempts represented by this error (1 unless retries were exhausted).
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::RetriesExhausted { attempts, .. } => *attempts,
            _ => 1,
        }
    }
}

// No `From<reqwest::Error>` or `From<std::io::Error>`: every variant needs the
// URL or path the source error lacks, so callers go through the constructors.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_timeout_display() {
        let error = DownloadError::timeout("https://repo1.maven.org/maven2/a.jar");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("https://repo1.maven.org/maven2/a.jar"));
    }

    #[test]
    fn test_download_error_http_status_display() {
        let error = DownloadError::http_status("https://static.crates.io/crates/x.crate", 503);
        let msg = error.to_string();
        assert!(msg.contains("503"), "Expected '503' in: {msg}");
        assert!(msg.contains("x.crate"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_download_error_io_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let error = DownloadError::io(PathBuf::from("/mirror/gems/a-1.0.gem"), io_error);
        assert!(error.to_string().contains("/mirror/gems/a-1.0.gem"));
        assert!(error.is_local_io());
    }

    #[test]
    fn test_download_error_integrity_display() {
        let error = DownloadError::integrity("/mirror/lib-1.0.jar", 1024, 512);
        let msg = error.to_string();
        assert!(msg.contains("1024"), "Expected expected size in: {msg}");
        assert!(msg.contains("512"), "Expected actual size in: {msg}");
    }

    #[test]
    fn test_is_not_found_only_for_404_and_410() {
        assert!(DownloadError::http_status("u", 404).is_not_found());
        assert!(DownloadError::http_status("u", 410).is_not_found());
        assert!(!DownloadError::http_status("u", 403).is_not_found());
        assert!(!DownloadError::timeout("u").is_not_found());
    }

    #[test]
    fn test_retries_exhausted_reports_attempts_and_source() {
        let error = DownloadError::retries_exhausted(3, DownloadError::http_status("u", 500));
        assert_eq!(error.attempts(), 3);
        assert!(error.to_string().contains("3 attempts"));
        assert!(error.to_string().contains("HTTP 500"));
        assert_eq!(DownloadError::timeout("u").attempts(), 1);
    }

    #[test]
    fn test_retries_exhausted_preserves_local_io_classification() {
        let io_error = std::io::Error::other("disk full");
        let error = DownloadError::retries_exhausted(2, DownloadError::io("/m/x", io_error));
        assert!(error.is_local_io());
    }
}
