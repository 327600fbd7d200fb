//! npm: `/-/v1/search` listing, packument version lookup and the
//! `npm/[@scope/]<name>/-/<name>-<version>.tgz` mirror layout.
//!
//! Scoped packages (`@babel/core`) are stored with the scope as namespace and
//! the bare name as name, so neither part contains a path separator.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use semver::Version;
use serde::Deserialize;
use serde::de::IgnoredAny;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{
    Endpoints, ListingPage, Registry, RegistryKind, VersionSelection, api_url, cap_versions,
};
use crate::artifact::{
    Artifact, ArtifactError, DownloadTask, FileRole, sanitize_segment, validate_segment,
};
use crate::download::{DownloadError, HttpClient};

/// Results requested per search page (the API maximum).
pub const NPM_PAGE_SIZE: u32 = 250;

/// registry.npmjs.org or a compatible registry.
#[derive(Debug, Clone)]
pub struct NpmRegistry {
    base: String,
    query: String,
    size: u32,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    objects: Vec<Value>,
    #[serde(default)]
    total: u64,
}

#[derive(Debug, Deserialize)]
struct Packument {
    #[serde(default)]
    versions: BTreeMap<String, IgnoredAny>,
    #[serde(rename = "dist-tags", default)]
    dist_tags: DistTags,
}

#[derive(Debug, Default, Deserialize)]
struct DistTags {
    latest: Option<String>,
}

impl NpmRegistry {
    /// Creates the registry. Listing uses `query` as the search text.
    #[must_use]
    pub fn new(endpoints: &Endpoints, query: Option<String>) -> Self {
        Self {
            base: endpoints.npm_registry.trim_end_matches('/').to_string(),
            query: query.unwrap_or_default(),
            size: NPM_PAGE_SIZE,
        }
    }

    /// Overrides the number of results per search page.
    #[must_use]
    pub fn with_page_size(mut self, size: u32) -> Self {
        self.size = size.max(1);
        self
    }

    /// Full package name as the registry spells it.
    fn package_name(artifact: &Artifact) -> String {
        match &artifact.namespace {
            Some(scope) => format!("{scope}/{}", artifact.name),
            None => artifact.name.clone(),
        }
    }
}

#[async_trait]
impl Registry for NpmRegistry {
    fn kind(&self) -> RegistryKind {
        RegistryKind::Npm
    }

    fn validate(&self, artifact: &Artifact) -> Result<(), ArtifactError> {
        match artifact.namespace.as_deref() {
            Some(scope) if scope.len() < 2 || !scope.starts_with('@') => {
                Err(ArtifactError::InvalidSegment {
                    field: "namespace",
                    value: scope.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    #[instrument(skip(self, client), fields(registry = "npm"))]
    async fn fetch_listing_page(
        &self,
        client: &HttpClient,
        page: u32,
    ) -> Result<ListingPage, DownloadError> {
        let from = u64::from(page) * u64::from(self.size);
        let size = self.size.to_string();
        let offset = from.to_string();
        let url = api_url(
            &self.base,
            &["-", "v1", "search"],
            &[
                ("text", self.query.as_str()),
                ("size", size.as_str()),
                ("from", offset.as_str()),
            ],
        )?;

        let body: SearchPage = client.get_json(&url).await?;
        let returned = body.objects.len();
        let has_more = returned > 0 && from + (returned as u64) < body.total;
        debug!(from, total = body.total, returned, "npm search page");

        Ok(ListingPage {
            records: body.objects.iter().map(search_record).collect(),
            has_more,
        })
    }

    fn tasks(
        &self,
        root: &Path,
        artifact: &Artifact,
        version: &str,
    ) -> Result<Vec<DownloadTask>, ArtifactError> {
        self.validate(artifact)?;
        let name = artifact.name.as_str();
        validate_segment("name", name)?;
        validate_segment("version", version)?;

        let file_name = format!("{name}-{version}.tgz");
        let mut dir = root.join("npm");
        if let Some(scope) = &artifact.namespace {
            dir.push(sanitize_segment(scope));
        }
        dir.push(sanitize_segment(name));
        dir.push("-");

        Ok(vec![DownloadTask::new(
            format!("{}/{}/-/{file_name}", self.base, Self::package_name(artifact)),
            dir.join(sanitize_segment(&file_name)),
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
        if !selection.is_active() {
            return Ok(artifact.versions.clone());
        }

        let segment = match &artifact.namespace {
            Some(scope) => format!("{scope}%2f{}", artifact.name),
            None => artifact.name.clone(),
        };
        let url = api_url(&self.base, &[segment.as_str()], &[])?;
        let packument: Packument = client.get_json(&url).await?;

        if selection.max_versions.is_some() {
            let versions = newest_first(packument.versions.into_keys());
            return Ok(cap_versions(versions, selection.max_versions));
        }
        Ok(packument
            .dist_tags
            .latest
            .map_or_else(|| artifact.versions.clone(), |latest| vec![latest]))
    }
}

/// Turns one search object into a listing record, splitting scoped names.
fn search_record(object: &Value) -> Value {
    let Some(package) = object.get("package") else {
        return Value::Null;
    };
    let mut record = package.clone();
    let scoped = package
        .get("name")
        .and_then(Value::as_str)
        .and_then(split_scope)
        .map(|(scope, name)| (scope.to_string(), name.to_string()));
    if let (Some((scope, name)), Value::Object(fields)) = (scoped, &mut record) {
        fields.insert("namespace".to_string(), Value::String(scope));
        fields.insert("name".to_string(), Value::String(name));
    }
    record
}

/// `@scope/name` to `("@scope", "name")`; unscoped names yield `None`.
fn split_scope(package: &str) -> Option<(&str, &str)> {
    if !package.starts_with('@') {
        return None;
    }
    package.split_once('/')
}

/// Orders semantic versions newest first; anything unparsable is dropped.
fn newest_first(versions: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut parsed: Vec<(Version, String)> = versions
        .into_iter()
        .filter_map(|raw| match Version::parse(&raw) {
            Ok(version) => Some((version, raw)),
            Err(error) => {
                debug!(version = %raw, %error, "ignoring non-semver version");
                None
            }
        })
        .collect();
    parsed.sort_by(|a, b| b.0.cmp(&a.0));
    parsed.into_iter().map(|(_, raw)| raw).collect()
}
