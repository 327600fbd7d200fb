//! rubygems.org: `search.json` listing, `/api/v1/versions` lookup and the
//! `gems/` + `quick/Marshal.4.8/` mirror layout.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{
    Endpoints, ListingPage, Registry, RegistryKind, VersionSelection, api_url, cap_versions,
};
use crate::artifact::{
    Artifact, ArtifactError, DownloadTask, FileRole, sanitize_segment, validate_segment,
};
use crate::download::{DownloadError, HttpClient};

/// Platform of pure-Ruby gems; other platforms carry a suffix in the file name.
const RUBY_PLATFORM: &str = "ruby";

/// rubygems.org or a compatible gem server.
#[derive(Debug, Clone)]
pub struct RubyGemsRegistry {
    base: String,
    query: String,
}

#[derive(Debug, Deserialize)]
struct GemVersion {
    number: String,
    #[serde(default)]
    platform: Option<String>,
}

impl RubyGemsRegistry {
    /// Creates the registry. Listing uses `query` as the search term.
    #[must_use]
    pub fn new(endpoints: &Endpoints, query: Option<String>) -> Self {
        Self {
            base: endpoints.rubygems.trim_end_matches('/').to_string(),
            query: query.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Registry for RubyGemsRegistry {
    fn kind(&self) -> RegistryKind {
        RegistryKind::RubyGems
    }

    #[instrument(skip(self, client), fields(registry = "rubygems"))]
    async fn fetch_listing_page(
        &self,
        client: &HttpClient,
        page: u32,
    ) -> Result<ListingPage, DownloadError> {
        let page_number = (page + 1).to_string();
        let url = api_url(
            &self.base,
            &["api", "v1", "search.json"],
            &[("query", self.query.as_str()), ("page", page_number.as_str())],
        )?;

        let records: Vec<serde_json::Value> = client.get_json(&url).await?;
        debug!(page = page + 1, returned = records.len(), "rubygems search page");

        Ok(ListingPage {
            has_more: !records.is_empty(),
            records,
        })
    }

    fn tasks(
        &self,
        root: &Path,
        artifact: &Artifact,
        version: &str,
    ) -> Result<Vec<DownloadTask>, ArtifactError> {
        let name = artifact.name.as_str();
        validate_segment("name", name)?;
        validate_segment("version", version)?;

        let gem = format!("{name}-{version}.gem");
        let gemspec = format!("{name}-{version}.gemspec.rz");

        Ok(vec![
            DownloadTask::new(
                format!("{}/gems/{gem}", self.base),
                root.join("gems").join(sanitize_segment(&gem)),
                FileRole::Primary,
            ),
            DownloadTask::new(
                format!("{}/quick/Marshal.4.8/{gemspec}", self.base),
                root.join("quick")
                    .join("Marshal.4.8")
                    .join(sanitize_segment(&gemspec)),
                FileRole::Metadata,
            )
            .optional(),
        ])
    }

    #[instrument(skip(self, client, artifact), fields(artifact = %artifact.name))]
    async fn resolve_versions(
        &self,
        client: &HttpClient,
        artifact: &Artifact,
        selection: VersionSelection,
    ) -> Result<Vec<String>, DownloadError> {
        if selection.max_versions.is_none() {
            return Ok(artifact.versions.clone());
        }

        let file = format!("{}.json", artifact.name);
        let url = api_url(&self.base, &["api", "v1", "versions", file.as_str()], &[])?;
        let listed: Vec<GemVersion> = client.get_json(&url).await?;

        let mut versions: Vec<String> = Vec::new();
        for version in listed {
            let is_ruby = version
                .platform
                .as_deref()
                .is_none_or(|platform| platform == RUBY_PLATFORM);
            if is_ruby && !versions.contains(&version.number) {
                versions.push(version.number);
            }
        }
        Ok(cap_versions(versions, selection.max_versions))
    }
}
