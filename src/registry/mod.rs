//! Supported registries: how each one paginates, resolves versions and lays
//! files out in the mirror.
//!
//! A [`Registry`] is the only place that knows registry-specific URLs. The
//! enumerator asks it for listing pages, the mirror driver asks it for the
//! ordered [`DownloadTask`]s of a unit.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::artifact::{Artifact, ArtifactError, DownloadTask};
use crate::download::{DownloadError, HttpClient};

mod crates;
mod maven;
mod npm;
mod rubygems;

pub use crates::CratesRegistry;
pub use maven::{MavenMetadata, MavenRegistry};
pub use npm::NpmRegistry;
pub use rubygems::RubyGemsRegistry;

/// Registry selector used by the CLI and configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    /// Maven Central.
    Maven,
    /// crates.io.
    Crates,
    /// rubygems.org.
    #[serde(alias = "gems")]
    RubyGems,
    /// The npm registry.
    Npm,
}

impl RegistryKind {
    /// All supported registries.
    pub const ALL: [RegistryKind; 4] = [Self::Maven, Self::Crates, Self::RubyGems, Self::Npm];

    /// Lowercase name accepted on the command line.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Maven => "maven",
            Self::Crates => "crates",
            Self::RubyGems => "rubygems",
            Self::Npm => "npm",
        }
    }

    /// Whether listing this registry needs a search query.
    #[must_use]
    pub fn requires_query(self) -> bool {
        matches!(self, Self::RubyGems | Self::Npm)
    }
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "maven" | "maven-central" => Ok(Self::Maven),
            "crates" | "crates.io" | "cargo" => Ok(Self::Crates),
            "rubygems" | "gems" => Ok(Self::RubyGems),
            "npm" | "npmjs" => Ok(Self::Npm),
            other => Err(format!(
                "unknown registry '{other}' (expected one of: maven, crates, rubygems, npm)"
            )),
        }
    }
}

/// Base URLs of the registry services. Overridable from the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Endpoints {
    /// Maven repository root (`.../maven2`).
    pub maven_repository: String,
    /// Maven search service root (`.../solrsearch/select`).
    pub maven_search: String,
    /// crates.io API root (`.../api/v1`).
    pub crates_api: String,
    /// crates.io static download root (`.../crates`).
    pub crates_download: String,
    /// RubyGems root (`https://rubygems.org`).
    pub rubygems: String,
    /// npm registry root (`https://registry.npmjs.org`).
    pub npm_registry: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            maven_repository: "https://repo1.maven.org/maven2".to_string(),
            maven_search: "https://search.maven.org/solrsearch/select".to_string(),
            crates_api: "https://crates.io/api/v1".to_string(),
            crates_download: "https://static.crates.io/crates".to_string(),
            rubygems: "https://rubygems.org".to_string(),
            npm_registry: "https://registry.npmjs.org".to_string(),
        }
    }
}

impl Endpoints {
    /// Points every endpoint at one base URL (mock servers in tests).
    #[must_use]
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            maven_repository: format!("{base}/maven2"),
            maven_search: format!("{base}/solrsearch/select"),
            crates_api: format!("{base}/api/v1"),
            crates_download: format!("{base}/crates"),
            rubygems: base.to_string(),
            npm_registry: format!("{base}/npm"),
        }
    }
}

/// One page of raw listing records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingPage {
    /// Records as returned by the registry, parsed by the enumerator.
    pub records: Vec<serde_json::Value>,
    /// Whether another page should be requested.
    pub has_more: bool,
}

/// Which versions of an artifact to mirror.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionSelection {
    /// Ask the registry for the newest versions, keeping at most this many.
    pub max_versions: Option<usize>,
    /// Replace listed versions with the latest release (Maven, npm).
    pub check_latest: bool,
}

impl VersionSelection {
    /// Whether the registry needs to be consulted at all.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.max_versions.is_some() || self.check_latest
    }
}

/// Registry-specific behaviour.
#[async_trait]
pub trait Registry: Send + Sync + fmt::Debug {
    /// Which registry this is.
    fn kind(&self) -> RegistryKind;

    /// Rejects artifacts this registry's layout cannot place.
    ///
    /// Listings are filtered through this before mirroring, so a record that
    /// fails here is skipped rather than failing as a unit.
    fn validate(&self, _artifact: &Artifact) -> Result<(), ArtifactError> {
        Ok(())
    }

    /// Fetches listing page `page` (0-based).
    async fn fetch_listing_page(
        &self,
        client: &HttpClient,
        page: u32,
    ) -> Result<ListingPage, DownloadError>;

    /// Ordered download tasks for one unit, rooted at the mirror directory.
    fn tasks(
        &self,
        root: &Path,
        artifact: &Artifact,
        version: &str,
    ) -> Result<Vec<DownloadTask>, ArtifactError>;

    /// Versions to mirror for `artifact`.
    ///
    /// The default keeps the listed versions.
    async fn resolve_versions(
        &self,
        _client: &HttpClient,
        artifact: &Artifact,
        _selection: VersionSelection,
    ) -> Result<Vec<String>, DownloadError> {
        Ok(artifact.versions.clone())
    }
}

/// Creates the registry implementation for `kind`.
#[must_use]
pub fn build_registry(
    kind: RegistryKind,
    endpoints: &Endpoints,
    query: Option<String>,
) -> Arc<dyn Registry> {
    match kind {
        RegistryKind::Maven => Arc::new(MavenRegistry::new(endpoints, query)),
        RegistryKind::Crates => Arc::new(CratesRegistry::new(endpoints, query)),
        RegistryKind::RubyGems => Arc::new(RubyGemsRegistry::new(endpoints, query)),
        RegistryKind::Npm => Arc::new(NpmRegistry::new(endpoints, query)),
    }
}

/// Builds `base/segments...` with percent-encoded query pairs.
pub(crate) fn api_url(
    base: &str,
    path: &[&str],
    query: &[(&str, &str)],
) -> Result<String, DownloadError> {
    let mut raw = base.trim_end_matches('/').to_string();
    for segment in path {
        raw.push('/');
        raw.push_str(segment);
    }
    let mut url = url::Url::parse(&raw).map_err(|_| DownloadError::invalid_url(raw.clone()))?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url.into())
}

/// Keeps at most `max` versions, in the order given.
pub(crate) fn cap_versions(mut versions: Vec<String>, max: Option<usize>) -> Vec<String> {
    if let Some(max) = max {
        versions.truncate(max.max(1));
    }
    versions
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_kind_parses_aliases() {
        assert_eq!("maven".parse::<RegistryKind>().unwrap(), RegistryKind::Maven);
        assert_eq!("crates.io".parse::<RegistryKind>().unwrap(), RegistryKind::Crates);
        assert_eq!("Gems".parse::<RegistryKind>().unwrap(), RegistryKind::RubyGems);
        assert_eq!("npmjs".parse::<RegistryKind>().unwrap(), RegistryKind::Npm);
        let err = "pypi".parse::<RegistryKind>().unwrap_err();
        assert!(err.contains("pypi"));
    }

    #[test]
    fn test_registry_kind_display_round_trips() {
        for kind in RegistryKind::ALL {
            assert_eq!(kind.to_string().parse::<RegistryKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_endpoints_with_base_trims_trailing_slash() {
        let endpoints = Endpoints::with_base("http://127.0.0.1:9000/");
        assert_eq!(endpoints.maven_repository, "http://127.0.0.1:9000/maven2");
        assert_eq!(endpoints.crates_api, "http://127.0.0.1:9000/api/v1");
        assert_eq!(endpoints.rubygems, "http://127.0.0.1:9000");
        assert_eq!(endpoints.npm_registry, "http://127.0.0.1:9000/npm");
    }

    #[test]
    fn test_query_required_for_search_only_registries() {
        assert!(RegistryKind::RubyGems.requires_query());
        assert!(RegistryKind::Npm.requires_query());
        assert!(!RegistryKind::Maven.requires_query());
        assert!(!RegistryKind::Crates.requires_query());
    }

    #[test]
    fn test_api_url_encodes_query() {
        let url = api_url(
            "https://search.maven.org/solrsearch/select",
            &[],
            &[("q", "*:*"), ("rows", "20")],
        )
        .unwrap();
        assert_eq!(
            url,
            "https://search.maven.org/solrsearch/select?q=*%3A*&rows=20"
        );
    }

    #[test]
    fn test_api_url_rejects_invalid_base() {
        assert!(matches!(
            api_url("not a url", &["x"], &[]),
            Err(DownloadError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_cap_versions() {
        let versions = vec!["3".to_string(), "2".to_string(), "1".to_string()];
        assert_eq!(cap_versions(versions.clone(), Some(2)), vec!["3", "2"]);
        assert_eq!(cap_versions(versions.clone(), None).len(), 3);
        assert_eq!(cap_versions(versions, Some(0)), vec!["3"]);
    }
}
