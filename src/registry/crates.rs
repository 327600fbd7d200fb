//! crates.io: paginated `/crates` listing, `/crates/<name>/versions` lookup
//! and the `crates/<name>/<version>/` mirror layout.

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

/// Page size requested from the listing endpoint (the API maximum).
pub const CRATES_PER_PAGE: u32 = 100;

/// crates.io API plus its static download host.
#[derive(Debug, Clone)]
pub struct CratesRegistry {
    api: String,
    download: String,
    query: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CratesPage {
    #[serde(default)]
    crates: Vec<serde_json::Value>,
    #[serde(default)]
    meta: PageMeta,
}

#[derive(Debug, Default, Deserialize)]
struct PageMeta {
    next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VersionsResponse {
    versions: Vec<CrateVersion>,
}

#[derive(Debug, Deserialize)]
struct CrateVersion {
    num: String,
}

impl CratesRegistry {
    /// Creates the registry; `query` narrows the listing with `q=`.
    #[must_use]
    pub fn new(endpoints: &Endpoints, query: Option<String>) -> Self {
        Self {
            api: endpoints.crates_api.trim_end_matches('/').to_string(),
            download: endpoints.crates_download.trim_end_matches('/').to_string(),
            query: query.filter(|q| !q.trim().is_empty()),
        }
    }
}

#[async_trait]
impl Registry for CratesRegistry {
    fn kind(&self) -> RegistryKind {
        RegistryKind::Crates
    }

    #[instrument(skip(self, client), fields(registry = "crates"))]
    async fn fetch_listing_page(
        &self,
        client: &HttpClient,
        page: u32,
    ) -> Result<ListingPage, DownloadError> {
        let page_number = (page + 1).to_string();
        let per_page = CRATES_PER_PAGE.to_string();
        let mut query = vec![("page", page_number.as_str()), ("per_page", per_page.as_str())];
        if let Some(q) = &self.query {
            query.push(("q", q.as_str()));
        }
        let url = api_url(&self.api, &["crates"], &query)?;

        let body: CratesPage = client.get_json(&url).await?;
        let has_more = body.meta.next_page.is_some() && !body.crates.is_empty();
        debug!(page = page + 1, returned = body.crates.len(), has_more, "crates page");

        Ok(ListingPage {
            records: body.crates,
            has_more,
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

        let file_name = format!("{name}-{version}.crate");
        let path = root
            .join("crates")
            .join(sanitize_segment(name))
            .join(sanitize_segment(version))
            .join(sanitize_segment(&file_name));

        Ok(vec![DownloadTask::new(
            format!("{}/{name}/{file_name}", self.download),
            path,
            FileRole::Primary,
        )])
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

        let url = api_url(&self.api, &["crates", artifact.name.as_str(), "versions"], &[])?;
        let body: VersionsResponse = client.get_json(&url).await?;
        let versions = body.versions.into_iter().map(|v| v.num).collect();
        Ok(cap_versions(versions, selection.max_versions))
    }
}
