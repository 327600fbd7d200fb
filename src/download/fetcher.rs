//! Resumable, size-verified file transfer.
//!
//! [`ResumableFetcher`] makes a local file byte-identical to a remote one:
//! it asks for the remote size, skips files that are already complete, resumes
//! shorter ones with a byte range and verifies the final size.

use std::path::Path;

use reqwest::StatusCode;
use tokio::fs::{File, OpenOptions};
use tracing::{debug, info, instrument, warn};

use super::client::{HttpClient, announced_total, stream_to_file};
use super::{DownloadError, RetryPolicy};
use crate::artifact::DownloadTask;

/// Result of a successful [`ResumableFetcher::fetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The local file already matched the remote size; nothing was transferred.
    AlreadyComplete {
        /// Size of the local file.
        bytes: u64,
    },
    /// Bytes were transferred and the final size verified.
    Downloaded {
        /// Final size of the local file.
        bytes: u64,
        /// Offset the transfer resumed from (0 for a full fetch).
        resumed_from: u64,
    },
    /// The remote resource does not exist (404/410).
    Missing,
}

impl FetchOutcome {
    /// Final local size, if the file exists.
    #[must_use]
    pub fn bytes(&self) -> Option<u64> {
        match self {
            Self::AlreadyComplete { bytes } | Self::Downloaded { bytes, .. } => Some(*bytes),
            Self::Missing => None,
        }
    }
}

/// Downloads files with byte-range resume under a shared [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct ResumableFetcher {
    client: HttpClient,
    policy: RetryPolicy,
}

/// How the next transfer starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Skip(u64),
    Resume(u64),
    Full,
}

impl ResumableFetcher {
    /// Creates a fetcher over a shared client and retry policy.
    #[must_use]
    pub fn new(client: HttpClient, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Returns the retry policy in use.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetches one download task.
    ///
    /// # Errors
    ///
    /// See [`fetch_with`](Self::fetch_with).
    pub async fn fetch_task(&self, task: &DownloadTask) -> Result<FetchOutcome, DownloadError> {
        self.fetch_with(&task.url, &task.path, task.resumable).await
    }

    /// Makes `dest` byte-identical to `url`, resuming a partial file.
    ///
    /// # Errors
    ///
    /// See [`fetch_with`](Self::fetch_with).
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<FetchOutcome, DownloadError> {
        self.fetch_with(url, dest, true).await
    }

    /// Makes `dest` byte-identical to `url`.
    ///
    /// When `resumable` is false a local file with a different size is
    /// always fetched again in full instead of being extended.
    ///
    /// Each attempt re-reads both the remote and the local size, so a
    /// transfer cut short by a transient error resumes on the next attempt.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::RetriesExhausted`] when transient failures
    /// persist, or the first non-retryable error (local IO, invalid URL,
    /// client-side HTTP status).
    #[instrument(skip(self), fields(path = %dest.display()))]
    pub async fn fetch_with(
        &self,
        url: &str,
        dest: &Path,
        resumable: bool,
    ) -> Result<FetchOutcome, DownloadError> {
        let result = self
            .policy
            .execute(url, |attempt| self.attempt(url, dest, resumable, attempt))
            .await;

        match result {
            Err(error) if error.is_not_found() => {
                debug!(url, "remote file missing");
                Ok(FetchOutcome::Missing)
            }
            other => other,
        }
    }

    async fn attempt(
        &self,
        url: &str,
        dest: &Path,
        resumable: bool,
        attempt: u32,
    ) -> Result<FetchOutcome, DownloadError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }

        let remote_size = self.client.remote_info(url).await?.size;
        let local_size = local_file_size(dest).await?;

        let plan = plan_transfer(local_size, remote_size, resumable);
        debug!(url, attempt, ?local_size, ?remote_size, ?plan, "planned transfer");

        let range_start = match plan {
            Plan::Skip(bytes) => {
                info!(url, bytes, "already complete");
                return Ok(FetchOutcome::AlreadyComplete { bytes });
            }
            Plan::Resume(offset) => Some(offset),
            Plan::Full => None,
        };

        let response = self.client.get_file(url, range_start).await?;
        let resumed_from = match (range_start, response.status()) {
            (Some(offset), StatusCode::PARTIAL_CONTENT) => offset,
            (Some(offset), _) => {
                warn!(url, offset, "server ignored range request, rewriting file");
                0
            }
            (None, _) => 0,
        };

        let expected = remote_size.or_else(|| announced_total(&response, resumed_from));
        let file = open_destination(dest, resumed_from > 0).await?;
        let written = stream_to_file(file, response, url, dest).await?;
        let bytes = resumed_from.saturating_add(written);

        if let Some(expected) = expected
            && expected != bytes
        {
            return Err(DownloadError::integrity(dest, expected, bytes));
        }

        info!(url, bytes, resumed_from, "download complete");
        Ok(FetchOutcome::Downloaded {
            bytes,
            resumed_from,
        })
    }
}

fn plan_transfer(local: Option<u64>, remote: Option<u64>, resumable: bool) -> Plan {
    match (local, remote) {
        (Some(local), Some(remote)) if local == remote => Plan::Skip(local),
        (Some(local), Some(remote)) if resumable && local > 0 && local < remote => {
            Plan::Resume(local)
        }
        _ => Plan::Full,
    }
}

async fn local_file_size(path: &Path) -> Result<Option<u64>, DownloadError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
        Ok(_) => Err(DownloadError::io(
            path,
            std::io::Error::other("destination exists and is not a regular file"),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(DownloadError::io(path, e)),
    }
}

async fn open_destination(path: &Path, append: bool) -> Result<File, DownloadError> {
    let file = if append {
        OpenOptions::new().append(true).open(path).await
    } else {
        File::create(path).await
    };
    file.map_err(|e| DownloadError::io(path, e))
}
