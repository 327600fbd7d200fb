//! Artifacts, mirror units and the download tasks derived from them.
//!
//! An [`Artifact`] is a named package with one or more versions. Each
//! (artifact, version) pair is a [`UnitId`], the granularity at which progress
//! is recorded. A registry layout turns a unit into an ordered list of
//! [`DownloadTask`]s.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Characters replaced by `_` when a value becomes a path segment.
const UNSAFE_PATH_CHARS: &[char] = &[':', '*', '?', '"', '<', '>', '|'];

/// Errors for artifact records that cannot be mirrored safely.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArtifactError {
    /// A required field is empty.
    #[error("{field} is empty")]
    Empty {
        /// Field name (`name`, `namespace`, `version`).
        field: &'static str,
    },

    /// A field would escape or split the mirror directory layout.
    #[error("{field} '{value}' is not a valid path segment")]
    InvalidSegment {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// The record lists no version.
    #[error("artifact '{id}' has no versions")]
    NoVersions {
        /// Artifact identifier.
        id: String,
    },
}

/// A package to mirror.
///
/// ```
/// use registry_mirror::Artifact;
///
/// let artifact = Artifact::new(Some("com.example"), "lib", ["1.0"]).unwrap();
/// assert_eq!(artifact.id(), "com.example:lib");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Maven group or other namespace, absent for flat registries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Package name.
    pub name: String,
    /// Versions to mirror, in listing order.
    pub versions: Vec<String>,
}

impl Artifact {
    /// Creates a validated artifact. Duplicate versions are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] when the name, namespace or a version is
    /// empty or not a safe path segment, or when no version is given.
    pub fn new<I, S>(namespace: Option<&str>, name: &str, versions: I) -> Result<Self, ArtifactError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.trim();
        validate_segment("name", name)?;

        let namespace = match namespace.map(str::trim) {
            Some(ns) => {
                validate_segment("namespace", ns)?;
                Some(ns.to_string())
            }
            None => None,
        };

        let mut artifact = Self {
            namespace,
            name: name.to_string(),
            versions: Vec::new(),
        };
        for version in versions {
            let version = version.into();
            let version = version.trim();
            validate_segment("version", version)?;
            artifact.push_version(version);
        }

        if artifact.versions.is_empty() {
            return Err(ArtifactError::NoVersions { id: artifact.id() });
        }
        Ok(artifact)
    }

    /// Identifier used as the progress key: `namespace:name` or `name`.
    #[must_use]
    pub fn id(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Appends a version unless it is already listed.
    pub fn push_version(&mut self, version: &str) {
        if !self.versions.iter().any(|v| v == version) {
            self.versions.push(version.to_string());
        }
    }

    /// Merges the versions of `other` (same identifier) in first-seen order.
    pub fn merge(&mut self, other: &Artifact) {
        for version in &other.versions {
            self.push_version(version);
        }
    }

    /// Returns the unit for one version of this artifact.
    #[must_use]
    pub fn unit(&self, version: &str) -> UnitId {
        UnitId::new(self.id(), version)
    }
}

/// One (artifact identifier, version) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId {
    artifact: String,
    version: String,
}

impl UnitId {
    /// Creates a unit identifier.
    #[must_use]
    pub fn new(artifact: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            artifact: artifact.into(),
            version: version.into(),
        }
    }

    /// Artifact identifier (`namespace:name` or `name`).
    #[must_use]
    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    /// Version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.artifact, self.version)
    }
}

/// Role of a file within a unit; tasks run primary first, extras last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileRole {
    /// The package payload (jar, crate, gem).
    Primary,
    /// Descriptors and index files (pom, maven-metadata.xml, gemspec).
    Metadata,
    /// Sources, javadoc, Gradle module files.
    Extra,
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Primary => "primary",
            Self::Metadata => "metadata",
            Self::Extra => "extra",
        };
        f.write_str(label)
    }
}

/// A single remote file and where it lands in the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    /// Remote URL.
    pub url: String,
    /// Local destination.
    pub path: PathBuf,
    /// Position in the fetch order.
    pub role: FileRole,
    /// A missing required file fails the unit.
    pub required: bool,
    /// Whether a shorter local file may be extended with a byte range.
    pub resumable: bool,
}

impl DownloadTask {
    /// Creates a required, resumable task.
    #[must_use]
    pub fn new(url: impl Into<String>, path: impl Into<PathBuf>, role: FileRole) -> Self {
        Self {
            url: url.into(),
            path: path.into(),
            role,
            required: true,
            resumable: true,
        }
    }

    /// Marks the task optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Marks the task as mutable metadata that is always fetched whole.
    #[must_use]
    pub fn not_resumable(mut self) -> Self {
        self.resumable = false;
        self
    }
}

/// Replaces characters that are unsafe in file names with `_`.
///
/// ```
/// use registry_mirror::artifact::sanitize_segment;
///
/// assert_eq!(sanitize_segment("a:b*c"), "a_b_c");
/// ```
#[must_use]
pub fn sanitize_segment(value: &str) -> String {
    value
        .chars()
        .map(|c| if UNSAFE_PATH_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Rejects values that cannot be used as a single path segment.
///
/// # Errors
///
/// Returns [`ArtifactError::Empty`] for empty values and
/// [`ArtifactError::InvalidSegment`] for `.`/`..`, path separators and
/// control characters.
pub fn validate_segment(field: &'static str, value: &str) -> Result<(), ArtifactError> {
    if value.is_empty() {
        return Err(ArtifactError::Empty { field });
    }
    let invalid = value == "."
        || value == ".."
        || value.contains(['/', '\\'])
        || value.chars().any(char::is_control);
    if invalid {
        return Err(ArtifactError::InvalidSegment {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
