//! Tests for `schema` module

use super::*;
use crate::config::ClusterConfig;
use crate::error::Error;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn metadata(unique_key: &str, fields: &[(&str, bool)]) -> SchemaMetadata {
    SchemaMetadata::new(
        unique_key,
        fields.iter().map(|(n, dv)| ((*n).to_string(), *dv)).collect(),
    )
}

fn selection(names: &[&str]) -> FieldSelection {
    FieldSelection::fields(names.iter().map(|n| (*n).to_string())).unwrap()
}

// ==================== SchemaMetadata Tests ====================

#[test]
fn test_metadata_blank_unique_key_defaults_to_id() {
    assert_eq!(metadata("  ", &[]).unique_key_field(), "id");
    assert_eq!(SchemaMetadata::default().unique_key_field(), "id");
    assert_eq!(metadata("sku", &[]).unique_key_field(), "sku");
}

#[test]
fn test_metadata_unknown_field_has_no_doc_values() {
    let meta = metadata("id", &[("id", true)]);

    assert!(meta.doc_values_enabled("id"));
    assert!(!meta.doc_values_enabled("missing"));
}

#[test]
fn test_extract_doc_values_accepts_bool_string_and_number() {
    // Arrange
    let response = json!({"fields": [
        {"name": "id", "docValues": true},
        {"name": "title", "docValues": "true"},
        {"name": "price", "docValues": 1},
        {"name": "body", "docValues": 0},
        {"name": "tags"},
        {"docValues": true},
        {"name": " ", "docValues": true}
    ]});

    // Act
    let flags = extract_doc_values(&response);

    // Assert
    assert_eq!(flags.len(), 5);
    assert_eq!(flags.get("id"), Some(&true));
    assert_eq!(flags.get("title"), Some(&true));
    assert_eq!(flags.get("price"), Some(&true));
    assert_eq!(flags.get("body"), Some(&false));
    assert_eq!(flags.get("tags"), Some(&false));
}

#[test]
fn test_extract_doc_values_without_fields_is_empty() {
    assert!(extract_doc_values(&json!({})).is_empty());
}

// ==================== decide_export Tests ====================

#[test]
fn test_decide_export_all_fields_rejected() {
    let decision = decide_export(&FieldSelection::All, &SchemaMetadata::default());

    assert!(!decision.use_export());
    assert_eq!(decision.reasons(), [ALL_FIELDS_REASON]);
}

#[test]
fn test_decide_export_all_doc_values_enabled() {
    // Arrange
    let meta = metadata("id", &[("id", true), ("title", true)]);

    // Act
    let decision = decide_export(&selection(&["id", "title"]), &meta);

    // Assert
    assert!(decision.use_export());
    assert!(decision.reasons().is_empty());
}

#[test]
fn test_decide_export_reports_each_missing_field() {
    // Arrange
    let meta = metadata("id", &[("id", true), ("title", false)]);

    // Act
    let decision = decide_export(&selection(&["id", "title", "body"]), &meta);

    // Assert
    assert!(!decision.use_export());
    assert_eq!(
        decision.reasons(),
        [
            "Field 'title' is not docValues-enabled in source schema",
            "Field 'body' is not docValues-enabled in source schema",
        ]
    );
}

#[test]
fn test_decide_export_requires_unique_key_doc_values() {
    let meta = metadata("sku", &[("title", true), ("sku", false)]);

    let decision = decide_export(&selection(&["title"]), &meta);

    assert!(!decision.use_export());
    assert_eq!(
        decision.reasons(),
        ["Field 'sku' is not docValues-enabled in source schema"]
    );
}

#[test]
fn test_decide_export_empty_field_list() {
    let decision = decide_export(&FieldSelection::Fields(Vec::new()), &SchemaMetadata::default());

    assert!(!decision.use_export());
    assert_eq!(decision.reasons(), ["No fields were selected for export"]);
}

// ==================== SchemaMetadataProvider Tests ====================

async fn provider_for(server: &MockServer) -> (SchemaMetadataProvider, CollectionRef) {
    let cluster = ClusterConfig::with_defaults(&format!("{}/solr", server.uri())).unwrap();
    let source = CollectionRef::new(cluster.clone(), "books").unwrap();
    (SchemaMetadataProvider::new(SolrClient::new(&cluster).unwrap()), source)
}

#[tokio::test]
async fn test_fetch_reads_unique_key_and_fields() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/solr/books/schema/uniquekey"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uniqueKey": "sku"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/solr/books/schema/fields"))
        .and(query_param("showDefaults", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"fields": [
            {"name": "sku", "docValues": true},
            {"name": "title", "docValues": false}
        ]})))
        .mount(&server)
        .await;
    let (provider, source) = provider_for(&server).await;

    // Act
    let meta = provider.fetch(&source, &RetryPolicy::no_retry()).await.unwrap();

    // Assert
    assert_eq!(meta.unique_key_field(), "sku");
    assert!(meta.doc_values_enabled("sku"));
    assert!(!meta.doc_values_enabled("title"));
}

#[tokio::test]
async fn test_fetch_failure_is_tagged_with_schema_stage() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let (provider, source) = provider_for(&server).await;
    let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1), 0.0).unwrap();

    // Act
    let err = provider.fetch(&source, &policy).await.unwrap_err();

    // Assert
    assert_eq!(err.stage(), Some(Stage::Schema));
    assert!(matches!(err.root_cause(), Error::Remote { status: 404, .. }));
}
