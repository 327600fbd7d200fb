//! Maven Central: solrsearch pagination, `maven-metadata.xml` version lookup
//! and the `maven2/` repository layout.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{
    Endpoints, ListingPage, Registry, RegistryKind, VersionSelection, api_url, cap_versions,
};
use crate::artifact::{
    Artifact, ArtifactError, DownloadTask, FileRole, sanitize_segment, validate_segment,
};
use crate::download::{DownloadError, HttpClient};

/// Rows requested per search page.
pub const MAVEN_PAGE_ROWS: u32 = 200;

/// Query used when listing without an explicit one.
const MATCH_ALL_QUERY: &str = "*:*";

#[allow(clippy::expect_used)]
static RELEASE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<release>\s*([^<\s]+)\s*</release>").expect("release regex is valid")
});

#[allow(clippy::expect_used)]
static LATEST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<latest>\s*([^<\s]+)\s*</latest>").expect("latest regex is valid")
});

#[allow(clippy::expect_used)]
static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<version>\s*([^<\s]+)\s*</version>").expect("version regex is valid")
});

/// Maven Central (or any Maven 2 layout repository with a solr search API).
#[derive(Debug, Clone)]
pub struct MavenRegistry {
    repository: String,
    search: String,
    query: String,
    rows: u32,
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    response: SearchResponse,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "numFound")]
    num_found: u64,
    #[serde(default)]
    docs: Vec<serde_json::Value>,
}

/// Versions announced by an artifact-level `maven-metadata.xml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MavenMetadata {
    /// `<release>`, else `<latest>`.
    pub latest: Option<String>,
    /// `<versions>` in file order (oldest first).
    pub versions: Vec<String>,
}

impl MavenMetadata {
    /// Extracts the version information from a `maven-metadata.xml` body.
    #[must_use]
    pub fn parse(xml: &str) -> Self {
        let capture = |pattern: &Regex| {
            pattern
                .captures(xml)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        };
        Self {
            latest: capture(&RELEASE_PATTERN).or_else(|| capture(&LATEST_PATTERN)),
            versions: VERSION_PATTERN
                .captures_iter(xml)
                .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                .collect(),
        }
    }
}

impl MavenRegistry {
    /// Creates the registry; `query` defaults to match-all.
    #[must_use]
    pub fn new(endpoints: &Endpoints, query: Option<String>) -> Self {
        Self {
            repository: endpoints.maven_repository.trim_end_matches('/').to_string(),
            search: endpoints.maven_search.clone(),
            query: query.unwrap_or_else(|| MATCH_ALL_QUERY.to_string()),
            rows: MAVEN_PAGE_ROWS,
        }
    }

    /// Overrides the number of rows per search page.
    #[must_use]
    pub fn with_rows(mut self, rows: u32) -> Self {
        self.rows = rows.max(1);
        self
    }

    fn group_segments(artifact: &Artifact) -> Result<Vec<&str>, ArtifactError> {
        let group = artifact
            .namespace
            .as_deref()
            .ok_or(ArtifactError::Empty { field: "namespace" })?;
        let segments: Vec<&str> = group.split('.').collect();
        for segment in &segments {
            validate_segment("namespace", segment)?;
        }
        Ok(segments)
    }

    fn metadata_url(&self, artifact: &Artifact) -> Result<String, ArtifactError> {
        let group = Self::group_segments(artifact)?.join("/");
        Ok(format!(
            "{}/{group}/{}/maven-metadata.xml",
            self.repository, artifact.name
        ))
    }
}

#[async_trait]
impl Registry for MavenRegistry {
    fn kind(&self) -> RegistryKind {
        RegistryKind::Maven
    }

    fn validate(&self, artifact: &Artifact) -> Result<(), ArtifactError> {
        Self::group_segments(artifact).map(|_| ())
    }

    #[instrument(skip(self, client), fields(registry = "maven"))]
    async fn fetch_listing_page(
        &self,
        client: &HttpClient,
        page: u32,
    ) -> Result<ListingPage, DownloadError> {
        let start = u64::from(page) * u64::from(self.rows);
        let rows = self.rows.to_string();
        let offset = start.to_string();
        let url = api_url(
            &self.search,
            &[],
            &[
                ("q", self.query.as_str()),
                ("rows", rows.as_str()),
                ("start", offset.as_str()),
                ("wt", "json"),
            ],
        )?;

        let envelope: SearchEnvelope = client.get_json(&url).await?;
        let SearchResponse { num_found, docs } = envelope.response;
        let has_more = !docs.is_empty() && start + (docs.len() as u64) < num_found;
        debug!(start, num_found, returned = docs.len(), "maven search page");

        Ok(ListingPage {
            records: docs,
            has_more,
        })
    }

    fn tasks(
        &self,
        root: &Path,
        artifact: &Artifact,
        version: &str,
    ) -> Result<Vec<DownloadTask>, ArtifactError> {
        let group = Self::group_segments(artifact)?;
        validate_segment("name", &artifact.name)?;
        validate_segment("version", version)?;

        let name = artifact.name.as_str();
        let artifact_url = format!("{}/{}/{name}", self.repository, group.join("/"));
        let version_url = format!("{artifact_url}/{version}");

        let mut artifact_dir: PathBuf = root.join("maven2");
        for segment in &group {
            artifact_dir.push(sanitize_segment(segment));
        }
        artifact_dir.push(sanitize_segment(name));
        let version_dir = artifact_dir.join(sanitize_segment(version));

        let file = |suffix: &str| {
            let file_name = format!("{name}-{version}{suffix}");
            (
                format!("{version_url}/{file_name}"),
                version_dir.join(sanitize_segment(&file_name)),
            )
        };

        let (jar_url, jar_path) = file(".jar");
        let (pom_url, pom_path) = file(".pom");
        let (sources_url, sources_path) = file("-sources.jar");
        let (javadoc_url, javadoc_path) = file("-javadoc.jar");
        let (module_url, module_path) = file(".module");

        Ok(vec![
            DownloadTask::new(jar_url, jar_path, FileRole::Primary).optional(),
            DownloadTask::new(pom_url, pom_path, FileRole::Metadata),
            DownloadTask::new(
                format!("{artifact_url}/maven-metadata.xml"),
                artifact_dir.join("maven-metadata.xml"),
                FileRole::Metadata,
            )
            .optional()
            .not_resumable(),
            DownloadTask::new(sources_url, sources_path, FileRole::Extra).optional(),
            DownloadTask::new(javadoc_url, javadoc_path, FileRole::Extra).optional(),
            DownloadTask::new(module_url, module_path, FileRole::Extra).optional(),
        ])
    }

    #[instrument(skip(self, client, artifact), fields(artifact = %artifact.id()))]
    async fn resolve_versions(
        &self,
        client: &HttpClient,
        artifact: &Artifact,
        selection: VersionSelection,
    ) -> Result<Vec<String>, DownloadError> {
        if !selection.is_active() {
            return Ok(artifact.versions.clone());
        }

        let url = self
            .metadata_url(artifact)
            .map_err(|_| DownloadError::invalid_url(artifact.id()))?;
        let metadata = MavenMetadata::parse(&client.get_text(&url).await?);

        if selection.max_versions.is_some() && !metadata.versions.is_empty() {
            let newest_first: Vec<String> = metadata.versions.into_iter().rev().collect();
            return Ok(cap_versions(newest_first, selection.max_versions));
        }

        Ok(metadata
            .latest
            .map_or_else(|| artifact.versions.clone(), |latest| vec![latest]))
    }
}
