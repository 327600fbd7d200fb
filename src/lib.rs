//! Registry Mirror Library
//!
//! This library mirrors a subset of a package registry (Maven Central,
//! crates.io, RubyGems, npm) onto the local filesystem, resuming partial downloads
//! and persisting progress so an interrupted run picks up where it stopped.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`artifact`] - Artifacts, mirror units and download tasks
//! - [`download`] - HTTP client, retry policy, request pacing and the resumable fetcher
//! - [`enumerator`] - Artifact listings from registry search APIs or listing files
//! - [`mirror`] - The mirror driver and its per-unit state machine
//! - [`progress`] - Persisted record of completed units
//! - [`registry`] - Per-registry pagination, version lookup and file layout

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod artifact;
pub mod download;
pub mod enumerator;
pub mod mirror;
pub mod progress;
pub mod registry;
#[cfg(test)]
pub(crate) mod test_support;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use artifact::{Artifact, ArtifactError, DownloadTask, FileRole, UnitId};
pub use download::{
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY, DownloadError, FailureType, FetchOutcome,
    HttpClient, HttpSettings, RateLimiter, RemoteInfo, ResumableFetcher, RetryDecision,
    RetryPolicy, classify_error,
};
pub use enumerator::{
    EnumerateError, Enumerator, RecordError, load_listing, load_listing_for, parse_listing,
    retain_supported, write_listing, write_updated_listing,
};
pub use mirror::{
    MirrorDriver, MirrorError, MirrorOptions, MirrorReport, UnitOutcome, UnitState, VersionChange,
    write_version_changes,
};
pub use progress::{DEFAULT_PROGRESS_FILE, ProgressError, ProgressStore};
pub use registry::{
    CratesRegistry, Endpoints, ListingPage, MavenMetadata, MavenRegistry, NpmRegistry, Registry,
    RegistryKind, RubyGemsRegistry, VersionSelection, build_registry,
};
