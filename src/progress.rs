//! Persisted record of completed mirror units.
//!
//! The record is a JSON object mapping artifact identifiers to the versions
//! that are fully on disk:
//!
//! ```json
//! {"com.example:lib": ["1.0"], "serde": ["1.0.190", "1.0.189"]}
//! ```
//!
//! Every change is written to a temporary file in the same directory and
//! renamed over the record, so a crash leaves either the old or the new
//! record, never a torn one.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::artifact::UnitId;

/// File name of the progress record inside the mirror root.
pub const DEFAULT_PROGRESS_FILE: &str = ".mirror-progress.json";

/// Errors reading or writing the progress record.
#[derive(Debug, Error)]
pub enum ProgressError {
    /// The record exists but could not be read.
    #[error("failed to read progress file {path}: {source}")]
    Read {
        /// Record path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The record is not a JSON object of string arrays.
    #[error("progress file {path} is corrupt: {source}")]
    Corrupt {
        /// Record path.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The record could not be persisted.
    #[error("failed to write progress file {path}: {source}")]
    Write {
        /// Record path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// In-memory view of the progress record, bound to its file.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
    completed: BTreeMap<String, Vec<String>>,
}

impl ProgressStore {
    /// Loads the record at `path`; a missing file is an empty record.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Read`] for unreadable files and
    /// [`ProgressError::Corrupt`] when the content cannot be parsed. A corrupt
    /// record is never silently replaced.
    #[instrument]
    pub fn load(path: &Path) -> Result<Self, ProgressError> {
        let completed = match std::fs::read_to_string(path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|source| ProgressError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no progress file yet");
                BTreeMap::new()
            }
            Err(source) => {
                return Err(ProgressError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let store = Self {
            path: path.to_path_buf(),
            completed,
        };
        info!(units = store.completed_units(), "loaded progress record");
        Ok(store)
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `unit` is recorded as complete.
    #[must_use]
    pub fn is_complete(&self, unit: &UnitId) -> bool {
        self.completed
            .get(unit.artifact())
            .is_some_and(|versions| versions.iter().any(|v| v == unit.version()))
    }

    /// Records `unit` as complete and persists the record before returning.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Write`] when the record cannot be persisted;
    /// the in-memory view is rolled back in that case.
    #[instrument(skip(self), fields(unit = %unit))]
    pub fn mark_complete(&mut self, unit: &UnitId) -> Result<(), ProgressError> {
        if self.is_complete(unit) {
            return Ok(());
        }

        self.completed
            .entry(unit.artifact().to_string())
            .or_default()
            .push(unit.version().to_string());

        if let Err(error) = self.persist() {
            self.forget(unit);
            return Err(error);
        }
        debug!("recorded unit");
        Ok(())
    }

    /// Completed versions of one artifact.
    #[must_use]
    pub fn versions(&self, artifact: &str) -> &[String] {
        self.completed
            .get(artifact)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of completed units.
    #[must_use]
    pub fn completed_units(&self) -> usize {
        self.completed.values().map(Vec::len).sum()
    }

    fn forget(&mut self, unit: &UnitId) {
        if let Some(versions) = self.completed.get_mut(unit.artifact()) {
            versions.retain(|v| v != unit.version());
            if versions.is_empty() {
                self.completed.remove(unit.artifact());
            }
        }
    }

    fn persist(&self) -> Result<(), ProgressError> {
        let write_err = |source| ProgressError::Write {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(write_err)?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        serde_json::to_writer_pretty(&mut tmp, &self.completed)
            .map_err(|e| write_err(std::io::Error::other(e)))?;
        tmp.write_all(b"\n").map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}
