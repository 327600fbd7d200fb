//! Artifact enumeration from registry search APIs and listing files.
//!
//! Both sources yield raw JSON records that go through the same parser: field
//! aliases used by the different registries are accepted, malformed records
//! are skipped with a warning and repeated identifiers are merged.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::artifact::{Artifact, ArtifactError};
use crate::download::{DownloadError, HttpClient, RetryPolicy};
use crate::registry::Registry;

const NAMESPACE_KEYS: &[&str] = &["namespace", "group_id", "g", "group"];
const NAME_KEYS: &[&str] = &["name", "artifact_id", "a"];
const VERSION_KEYS: &[&str] = &[
    "version",
    "latest_version",
    "latestVersion",
    "max_version",
    "newest_version",
    "num",
];

/// Errors produced while building an artifact listing.
#[derive(Debug, Error)]
pub enum EnumerateError {
    /// A listing page could not be fetched, even after retries.
    #[error("failed to fetch listing page {page}: {source}")]
    Page {
        /// 0-based page index.
        page: u32,
        /// Underlying transport error.
        #[source]
        source: DownloadError,
    },

    /// Reading or writing a listing file failed.
    #[error("IO error on listing file {path}: {source}")]
    Io {
        /// Listing file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The listing is not valid JSON.
    #[error("listing is not valid JSON: {source}")]
    Json {
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The top-level JSON value has an unsupported shape.
    #[error("listing must be a JSON array or an object with an `artifacts` array")]
    Shape,
}

/// Why a single listing record was skipped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    /// The record is not a JSON object.
    #[error("record is not an object")]
    NotAnObject,
    /// No name field was found.
    #[error("record has no name")]
    MissingName,
    /// No version field was found.
    #[error("record has no version")]
    MissingVersion,
    /// Name, namespace or version failed validation.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Walks a registry's listing pages under the shared retry policy.
#[derive(Debug, Clone)]
pub struct Enumerator {
    registry: Arc<dyn Registry>,
    client: HttpClient,
    policy: RetryPolicy,
    max_pages: Option<u32>,
}

impl Enumerator {
    /// Creates an enumerator that reads every page.
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>, client: HttpClient, policy: RetryPolicy) -> Self {
        Self {
            registry,
            client,
            policy,
            max_pages: None,
        }
    }

    /// Stops after `max_pages` pages.
    #[must_use]
    pub fn with_max_pages(mut self, max_pages: Option<u32>) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Fetches pages until the registry reports no further results.
    ///
    /// # Errors
    ///
    /// Returns [`EnumerateError::Page`] when a page still fails after the
    /// retry policy gave up.
    #[instrument(skip(self), fields(registry = %self.registry.kind()))]
    pub async fn enumerate(&self) -> Result<Vec<Artifact>, EnumerateError> {
        let mut records: Vec<Value> = Vec::new();
        let mut page: u32 = 0;

        loop {
            if self.max_pages.is_some_and(|max| page >= max) {
                info!(pages = page, "page limit reached");
                break;
            }

            let registry = &self.registry;
            let client = &self.client;
            let listing = self
                .policy
                .execute(&format!("listing page {page}"), |_| {
                    registry.fetch_listing_page(client, page)
                })
                .await
                .map_err(|source| EnumerateError::Page { page, source })?;

            let returned = listing.records.len();
            records.extend(listing.records);
            info!(page, returned, total = records.len(), "fetched listing page");

            page += 1;
            if !listing.has_more || returned == 0 {
                break;
            }
        }

        Ok(retain_supported(
            self.registry.as_ref(),
            collect_artifacts(records),
        ))
    }
}

/// Drops artifacts the registry's layout cannot place, warning for each.
#[must_use]
pub fn retain_supported(registry: &dyn Registry, artifacts: Vec<Artifact>) -> Vec<Artifact> {
    let before = artifacts.len();
    let kept: Vec<Artifact> = artifacts
        .into_iter()
        .filter(|artifact| match registry.validate(artifact) {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    registry = %registry.kind(),
                    artifact = %artifact.id(),
                    %error,
                    "skipping listing record the registry cannot mirror"
                );
                false
            }
        })
        .collect();
    if kept.len() < before {
        warn!(
            skipped = before - kept.len(),
            kept = kept.len(),
            "listing contained unusable records"
        );
    }
    kept
}

/// Parses listing text (array or `{"artifacts": [...]}`).
///
/// # Errors
///
/// Returns [`EnumerateError::Json`] or [`EnumerateError::Shape`]; malformed
/// individual records are skipped, not errors.
pub fn parse_listing(text: &str) -> Result<Vec<Artifact>, EnumerateError> {
    let value: Value = serde_json::from_str(text).map_err(|source| EnumerateError::Json { source })?;
    let records = match value {
        Value::Array(records) => records,
        Value::Object(mut object) => match object.remove("artifacts") {
            Some(Value::Array(records)) => records,
            _ => return Err(EnumerateError::Shape),
        },
        _ => return Err(EnumerateError::Shape),
    };
    Ok(collect_artifacts(records))
}

/// Reads and parses a listing file.
///
/// # Errors
///
/// Returns [`EnumerateError::Io`] when the file cannot be read, otherwise
/// the errors of [`parse_listing`].
#[instrument]
pub fn load_listing(path: &Path) -> Result<Vec<Artifact>, EnumerateError> {
    let text = std::fs::read_to_string(path).map_err(|source| EnumerateError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let artifacts = parse_listing(&text)?;
    info!(count = artifacts.len(), "loaded listing");
    Ok(artifacts)
}

/// Reads a listing file and keeps only the records `registry` can mirror.
///
/// # Errors
///
/// Same as [`load_listing`].
pub fn load_listing_for(
    path: &Path,
    registry: &dyn Registry,
) -> Result<Vec<Artifact>, EnumerateError> {
    Ok(retain_supported(registry, load_listing(path)?))
}

/// Writes a listing file atomically (temp file in the same directory, then rename).
///
/// # Errors
///
/// Returns [`EnumerateError::Io`] when the directory is not writable.
#[instrument(skip(artifacts), fields(count = artifacts.len()))]
pub fn write_listing(path: &Path, artifacts: &[Artifact]) -> Result<(), EnumerateError> {
    write_json_atomic(path, artifacts).map_err(|source| EnumerateError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes `{"artifacts": [...]}` with the versions a run actually resolved.
///
/// # Errors
///
/// Returns [`EnumerateError::Io`] when the directory is not writable.
#[instrument(skip(artifacts), fields(count = artifacts.len()))]
pub fn write_updated_listing(path: &Path, artifacts: &[Artifact]) -> Result<(), EnumerateError> {
    write_json_atomic(path, &json!({ "artifacts": artifacts })).map_err(|source| {
        EnumerateError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Pretty JSON through a temp file in the target directory, then rename.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value).map_err(std::io::Error::other)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Parses one record, accepting the field aliases of every registry.
///
/// # Errors
///
/// Returns the [`RecordError`] that made the record unusable.
pub fn parse_record(record: &Value) -> Result<Artifact, RecordError> {
    let object = record.as_object().ok_or(RecordError::NotAnObject)?;

    let namespace = first_string(object, NAMESPACE_KEYS).filter(|ns| !ns.trim().is_empty());
    let name = first_string(object, NAME_KEYS).ok_or(RecordError::MissingName)?;

    let versions: Vec<String> = match object.get("versions") {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_string).collect(),
        _ => first_string(object, VERSION_KEYS).into_iter().collect(),
    };
    if versions.is_empty() {
        return Err(RecordError::MissingVersion);
    }

    Ok(Artifact::new(namespace.as_deref(), &name, versions)?)
}

fn first_string(object: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(scalar_string))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses records, skipping malformed ones and merging duplicates in
/// first-seen order.
fn collect_artifacts(records: Vec<Value>) -> Vec<Artifact> {
    let mut artifacts: Vec<Artifact> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut skipped = 0usize;

    for (position, record) in records.iter().enumerate() {
        let artifact = match parse_record(record) {
            Ok(artifact) => artifact,
            Err(error) => {
                skipped += 1;
                warn!(position, %error, "skipping malformed listing record");
                continue;
            }
        };

        let id = artifact.id();
        if let Some(&existing) = index.get(&id) {
            debug!(%id, "merging duplicate listing record");
            artifacts[existing].merge(&artifact);
        } else {
            index.insert(id, artifacts.len());
            artifacts.push(artifact);
        }
    }

    if skipped > 0 {
        warn!(skipped, kept = artifacts.len(), "listing contained malformed records");
    }
    artifacts
}
