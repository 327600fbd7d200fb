//! The mirror driver and the types describing a run.
//!
//! Each unit (artifact version) moves through
//! `Pending -> Fetching -> {Complete | Failed}`; units already in the progress
//! record go straight to `Skipped` without touching the network.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::instrument;

use crate::artifact::{Artifact, UnitId};
use crate::enumerator::write_json_atomic;
use crate::progress::ProgressError;
use crate::registry::VersionSelection;

mod driver;

pub use driver::MirrorDriver;

/// Lifecycle state of a mirror unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    /// Not yet looked at.
    Pending,
    /// Tasks are being fetched.
    Fetching,
    /// Every required file is on disk and the unit is recorded.
    Complete,
    /// Already recorded by an earlier run.
    Skipped,
    /// A task failed; the unit is not recorded and will be retried next run.
    Failed,
}

impl UnitState {
    /// Whether the state is final for this run.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Skipped | Self::Failed)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Complete => "complete",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Settings for one mirror run.
#[derive(Debug, Clone, Default)]
pub struct MirrorOptions {
    /// Root directory of the mirror tree.
    pub mirror_root: PathBuf,
    /// Version resolution against the registry.
    pub versions: VersionSelection,
    /// Skip artifacts listed before this identifier (or bare name).
    pub start_from: Option<String>,
}

/// Final state of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome {
    /// The unit.
    pub unit: UnitId,
    /// Terminal state reached.
    pub state: UnitState,
    /// Failure reason for `Failed` units.
    pub detail: Option<String>,
}

/// A listed version superseded by a newer one the registry announced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionChange {
    /// Namespace of the artifact, absent for flat registries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Artifact name.
    pub name: String,
    /// First version in the listing.
    pub old_version: String,
    /// Newest version the registry reported.
    pub new_version: String,
}

/// Summary of a mirror run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorReport {
    /// Units fetched and recorded in this run.
    pub completed: usize,
    /// Units skipped because the progress record already had them.
    pub skipped: usize,
    /// Units that failed.
    pub failed: usize,
    /// Optional files the registry does not have.
    pub missing_optional: usize,
    /// Artifacts passed over because of `start_from`.
    pub artifacts_passed: usize,
    /// The run stopped early on cancellation.
    pub interrupted: bool,
    /// Per-unit terminal states, in processing order.
    pub units: Vec<UnitOutcome>,
    /// Versions looked up from the registry, keyed by artifact identifier.
    pub resolved_versions: BTreeMap<String, Vec<String>>,
    /// Artifacts whose newest registry version was not in the listing.
    pub version_changes: Vec<VersionChange>,
}

impl MirrorReport {
    /// Units that reached a terminal state.
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed + self.skipped + self.failed
    }

    /// Terminal state of a unit, if it was processed.
    #[must_use]
    pub fn state_of(&self, unit: &UnitId) -> Option<UnitState> {
        self.units
            .iter()
            .find(|outcome| &outcome.unit == unit)
            .map(|outcome| outcome.state)
    }

    /// `artifacts` with every looked-up version list substituted.
    ///
    /// Artifacts the run did not reach keep their listed versions.
    #[must_use]
    pub fn updated_listing(&self, artifacts: &[Artifact]) -> Vec<Artifact> {
        artifacts
            .iter()
            .map(|artifact| {
                let mut updated = artifact.clone();
                if let Some(versions) = self.resolved_versions.get(&artifact.id()) {
                    updated.versions.clone_from(versions);
                }
                updated
            })
            .collect()
    }

    /// Stores looked-up versions; returns the change when the newest one was
    /// not listed.
    fn record_resolution(
        &mut self,
        artifact: &Artifact,
        versions: &[String],
    ) -> Option<&VersionChange> {
        self.resolved_versions
            .insert(artifact.id(), versions.to_vec());
        let old = artifact.versions.first()?;
        let new = versions.first()?;
        if artifact.versions.contains(new) {
            return None;
        }
        self.version_changes.push(VersionChange {
            namespace: artifact.namespace.clone(),
            name: artifact.name.clone(),
            old_version: old.clone(),
            new_version: new.clone(),
        });
        self.version_changes.last()
    }

    fn record(&mut self, unit: UnitId, state: UnitState, detail: Option<String>) {
        match state {
            UnitState::Complete => self.completed += 1,
            UnitState::Skipped => self.skipped += 1,
            UnitState::Failed => self.failed += 1,
            UnitState::Pending | UnitState::Fetching => return,
        }
        self.units.push(UnitOutcome {
            unit,
            state,
            detail,
        });
    }
}

/// Errors that abort a mirror run.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// The progress record could not be persisted; continuing would break the
    /// guarantee that recorded units are complete on disk.
    #[error(transparent)]
    Progress(#[from] ProgressError),

    /// A run summary file could not be written.
    #[error("failed to write {path}: {source}")]
    Summary {
        /// Target path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Writes `{"changed_artifacts": [...]}` atomically.
///
/// # Errors
///
/// Returns [`MirrorError::Summary`] when the file cannot be written.
#[instrument(skip(changes), fields(count = changes.len()))]
pub fn write_version_changes(path: &Path, changes: &[VersionChange]) -> Result<(), MirrorError> {
    write_json_atomic(path, &json!({ "changed_artifacts": changes })).map_err(|source| {
        MirrorError::Summary {
            path: path.to_path_buf(),
            source,
        }
    })
}
