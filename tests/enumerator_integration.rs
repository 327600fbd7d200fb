//! Listing enumeration against mock registry search APIs.

use std::sync::Arc;

use registry_mirror::{
    EnumerateError, Endpoints, Enumerator, MavenRegistry, NpmRegistry, RegistryKind,
    build_registry, load_listing, write_listing,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;
use support::{instant_policy, unpaced_client};

fn enumerator(kind: RegistryKind, server: &MockServer, query: Option<&str>) -> Enumerator {
    let registry = build_registry(
        kind,
        &Endpoints::with_base(&server.uri()),
        query.map(str::to_string),
    );
    Enumerator::new(registry, unpaced_client(), instant_policy(2))
}

async fn mount_crates_page(server: &MockServer, page: &str, body: serde_json::Value, times: u64) {
    Mock::given(method("GET"))
        .and(path("/api/v1/crates"))
        .and(query_param("page", page))
        .and(query_param("per_page", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_crates_listing_follows_next_page() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_crates_page(
        &server,
        "1",
        json!({
            "crates": [
                {"name": "serde", "max_version": "1.0.190"},
                {"name": "rand", "max_version": "0.8.5"}
            ],
            "meta": {"next_page": "?page=2&per_page=100", "total": 3}
        }),
        1,
    )
    .await;
    mount_crates_page(
        &server,
        "2",
        json!({
            "crates": [{"name": "tokio", "max_version": "1.35.0"}],
            "meta": {"next_page": null, "total": 3}
        }),
        1,
    )
    .await;
    mount_crates_page(&server, "3", json!({"crates": [], "meta": {}}), 0).await;

    let artifacts = enumerator(RegistryKind::Crates, &server, None)
        .enumerate()
        .await
        .unwrap();

    let names: Vec<&str> = artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, ["serde", "rand", "tokio"]);
    assert_eq!(artifacts[2].versions, vec!["1.35.0"]);
}

#[tokio::test]
async fn test_max_pages_stops_early() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_crates_page(
        &server,
        "1",
        json!({
            "crates": [{"name": "serde", "max_version": "1.0.190"}],
            "meta": {"next_page": "?page=2"}
        }),
        1,
    )
    .await;
    mount_crates_page(
        &server,
        "2",
        json!({
            "crates": [{"name": "rand", "max_version": "0.8.5"}],
            "meta": {"next_page": "?page=3"}
        }),
        0,
    )
    .await;

    let artifacts = enumerator(RegistryKind::Crates, &server, None)
        .with_max_pages(Some(1))
        .enumerate()
        .await
        .unwrap();
    assert_eq!(artifacts.len(), 1);
}

#[tokio::test]
async fn test_maven_listing_pages_until_num_found() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/solrsearch/select"))
        .and(query_param("start", "0"))
        .and(query_param("rows", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {
                "numFound": 3,
                "docs": [
                    {"g": "com.example", "a": "lib", "latestVersion": "1.0"},
                    {"g": "org.slf4j", "a": "slf4j-api", "latestVersion": "2.0.9"}
                ]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/solrsearch/select"))
        .and(query_param("start", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {
                "numFound": 3,
                "docs": [{"g": "junit", "a": "junit", "latestVersion": "4.13.2"}]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let registry = MavenRegistry::new(&Endpoints::with_base(&server.uri()), None).with_rows(2);
    let artifacts = Enumerator::new(Arc::new(registry), unpaced_client(), instant_policy(1))
        .enumerate()
        .await
        .unwrap();

    let ids: Vec<String> = artifacts.iter().map(|a| a.id()).collect();
    assert_eq!(ids, ["com.example:lib", "org.slf4j:slf4j-api", "junit:junit"]);
}

#[tokio::test]
async fn test_maven_listing_drops_docs_without_group() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/solrsearch/select"))
        .and(query_param("start", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {
                "numFound": 2,
                "docs": [
                    {"a": "orphan", "latestVersion": "1.0"},
                    {"g": "junit", "a": "junit", "latestVersion": "4.13.2"}
                ]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let artifacts = enumerator(RegistryKind::Maven, &server, None)
        .enumerate()
        .await
        .unwrap();

    let ids: Vec<String> = artifacts.iter().map(|a| a.id()).collect();
    assert_eq!(ids, ["junit:junit"]);
}

#[tokio::test]
async fn test_npm_listing_pages_by_offset_and_splits_scopes() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/npm/-/v1/search"))
        .and(query_param("text", "keywords:cli"))
        .and(query_param("size", "2"))
        .and(query_param("from", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "objects": [
                {"package": {"name": "@types/node", "version": "20.10.0"}},
                {"package": {"name": "commander", "version": "11.1.0"}}
            ],
            "total": 3
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/npm/-/v1/search"))
        .and(query_param("from", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "objects": [{"package": {"name": "yargs", "version": "17.7.2"}}],
            "total": 3
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/npm/-/v1/search"))
        .and(query_param("from", "4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"objects": [], "total": 3})))
        .expect(0)
        .mount(&server)
        .await;

    let registry = NpmRegistry::new(
        &Endpoints::with_base(&server.uri()),
        Some("keywords:cli".to_string()),
    )
    .with_page_size(2);
    let artifacts = Enumerator::new(Arc::new(registry), unpaced_client(), instant_policy(1))
        .enumerate()
        .await
        .unwrap();

    let ids: Vec<String> = artifacts.iter().map(|a| a.id()).collect();
    assert_eq!(ids, ["@types:node", "commander", "yargs"]);
    assert_eq!(artifacts[0].namespace.as_deref(), Some("@types"));
    assert_eq!(artifacts[2].versions, vec!["17.7.2"]);
}

#[tokio::test]
async fn test_rubygems_listing_stops_on_empty_page() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/api/v1/search.json"))
        .and(query_param("query", "rake"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"name": "rake", "version": "13.0.6"},
            {"name": "rake-compiler", "version": "1.2.5"}
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/search.json"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let artifacts = enumerator(RegistryKind::RubyGems, &server, Some("rake"))
        .enumerate()
        .await
        .unwrap();
    assert_eq!(artifacts.len(), 2);
    assert_eq!(artifacts[1].name, "rake-compiler");
}

#[tokio::test]
async fn test_malformed_records_are_skipped() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_crates_page(
        &server,
        "1",
        json!({
            "crates": [
                {"name": "serde", "max_version": "1.0.190"},
                {"max_version": "2.0.0"},
                {"name": "../escape", "max_version": "1.0.0"},
                "bare-name",
                {"name": "serde", "max_version": "1.0.189"}
            ],
            "meta": {"next_page": null}
        }),
        1,
    )
    .await;

    let artifacts = enumerator(RegistryKind::Crates, &server, None)
        .enumerate()
        .await
        .unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].versions, vec!["1.0.190", "1.0.189"]);
}

#[tokio::test]
async fn test_failing_page_is_retried_then_reported() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/api/v1/crates"))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let err = enumerator(RegistryKind::Crates, &server, None)
        .enumerate()
        .await
        .unwrap_err();
    assert!(matches!(err, EnumerateError::Page { page: 0, .. }));
}

#[tokio::test]
async fn test_enumerated_listing_round_trips_through_file() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_crates_page(
        &server,
        "1",
        json!({
            "crates": [{"name": "serde", "max_version": "1.0.190"}],
            "meta": {"next_page": null}
        }),
        1,
    )
    .await;

    let artifacts = enumerator(RegistryKind::Crates, &server, None)
        .enumerate()
        .await
        .unwrap();

    let dir = TempDir::new().unwrap();
    let listing = dir.path().join("lists/crates.json");
    write_listing(&listing, &artifacts).unwrap();
    assert_eq!(load_listing(&listing).unwrap(), artifacts);
}
