//! HTTP transport for the mirror: client, pacing, retries and resumable transfers.
//!
//! # Features
//!
//! - Streaming downloads (memory-efficient for large artifacts)
//! - Byte-range resume with size verification
//! - Per-host request pacing honouring `Retry-After`
//! - One fixed-delay retry policy shared by listing and file requests
//! - Structured error types with full context
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use registry_mirror::download::{
//!     HttpClient, HttpSettings, RateLimiter, ResumableFetcher, RetryPolicy,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = Arc::new(RateLimiter::new(std::time::Duration::from_secs(1)));
//! let client = HttpClient::new(&HttpSettings::default(), limiter)?;
//! let fetcher = ResumableFetcher::new(client, RetryPolicy::default());
//! let outcome = fetcher
//!     .fetch(
//!         "https://static.crates.io/crates/serde/serde-1.0.0.crate",
//!         Path::new("mirror/crates/serde/1.0.0/serde-1.0.0.crate"),
//!     )
//!     .await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
mod fetcher;
pub mod rate_limiter;
mod retry;

pub use client::{HttpClient, HttpSettings, RemoteInfo};
pub use error::DownloadError;
pub use fetcher::{FetchOutcome, ResumableFetcher};
pub use rate_limiter::{RateLimiter, extract_host, parse_retry_after};
pub use retry::{
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, FailureType, RetryDecision, RetryPolicy,
    classify_error,
};
