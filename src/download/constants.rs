//! Constants for the download module (timeouts, pacing, buffering).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large artifacts).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default minimum delay between requests to the same host (1 second).
pub const DEFAULT_RATE_LIMIT_MS: u64 = 1000;

/// Write buffer size used while streaming response bodies to disk.
pub const WRITE_BUFFER_BYTES: usize = 64 * 1024;

/// Warning threshold for cumulative pacing delay per host (30 seconds).
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);
