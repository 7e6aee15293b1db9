//! End-to-end reindex runs against mocked Solr clusters.
//!
//! Each test stands up one `wiremock` server playing both the source and
//! the target cluster, then drives `ReindexService::reindex` through
//! discovery, reading, batching and writing.

#![allow(clippy::pedantic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use solr_reindex::config::{
    ClusterConfig, CollectionRef, FieldSelection, ReindexFilters, ReindexRequest, ReindexTuning,
    TuningSettings,
};
use solr_reindex::{Error, ReindexService, RetryPolicy, Stage};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SOURCE: &str = "products_v1";
const TARGET: &str = "products_v2";
const CORE: &str = "products_v1_shard1_replica_n1";

fn cluster_status(server: &MockServer) -> Value {
    json!({
        "responseHeader": {"status": 0},
        "cluster": {
            "collections": {
                SOURCE: {
                    "shards": {
                        "shard1": {
                            "replicas": {
                                "core_node2": {
                                    "core": CORE,
                                    "base_url": format!("{}/solr", server.uri()),
                                    "state": "active",
                                    "leader": "true"
                                }
                            }
                        }
                    }
                }
            }
        }
    })
}

fn request(server: &MockServer, batch_size: usize) -> ReindexRequest {
    let cluster = ClusterConfig::with_defaults(&format!("{}/solr", server.uri())).unwrap();
    let tuning = ReindexTuning::try_from(TuningSettings {
        write_batch_size: batch_size,
        write_concurrency: 2,
        retry_policy: RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5), 0.0)
            .unwrap(),
        ..TuningSettings::default()
    })
    .unwrap();

    ReindexRequest::new(
        CollectionRef::new(cluster.clone(), SOURCE).unwrap(),
        CollectionRef::new(cluster, TARGET).unwrap(),
    )
    .with_filters(ReindexFilters::new(Some("category:books".to_string()), vec![], vec![]))
    .with_tuning(tuning)
}

async fn mount_discovery(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/solr/admin/collections"))
        .and(query_param("action", "CLUSTERSTATUS"))
        .and(query_param("collection", SOURCE))
        .respond_with(ResponseTemplate::new(200).set_body_json(cluster_status(server)))
        .mount(server)
        .await;
}

async fn mount_update_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/solr/{TARGET}/update")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"responseHeader": {"status": 0}})),
        )
        .mount(server)
        .await;
}

/// Documents received by the target's update handler, across all batches.
async fn indexed_documents(server: &MockServer) -> Vec<Value> {
    let update_path = format!("/solr/{TARGET}/update");
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == update_path)
        .flat_map(|r| {
            serde_json::from_slice::<Vec<Value>>(&r.body)
                .unwrap()
                .into_iter()
        })
        .collect()
}

#[tokio::test]
async fn test_cursor_reindex_copies_every_page() {
    // Arrange
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    let select = format!("/solr/{CORE}/select");
    Mock::given(method("GET"))
        .and(path(select.as_str()))
        .and(query_param("cursorMark", "*"))
        .and(query_param("distrib", "false"))
        .and(query_param("q", "category:books"))
        .and(query_param("sort", "id asc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {"numFound": 3, "docs": [
                {"id": "1", "title": "a", "_version_": 11},
                {"id": "2", "title": "b", "_version_": 12}
            ]},
            "nextCursorMark": "AoE2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(select.as_str()))
        .and(query_param("cursorMark", "AoE2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {"numFound": 3, "docs": [{"id": "3", "title": "c", "_version_": 13}]},
            "nextCursorMark": "AoE3"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(select.as_str()))
        .and(query_param("cursorMark", "AoE3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {"numFound": 3, "docs": []},
            "nextCursorMark": "AoE3"
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_update_ok(&server).await;

    // Act
    let result = ReindexService::new()
        .reindex(&request(&server, 2), Duration::from_secs(10))
        .await
        .unwrap();

    // Assert
    assert!(!result.export_mode_used);
    assert_eq!(
        result.warnings,
        vec!["/export disabled because all fields were requested".to_string()]
    );
    assert_eq!(result.stats.docs_read, 3);
    assert_eq!(result.stats.docs_indexed, 3);
    assert_eq!(result.stats.batches_sent, 2);
    assert_eq!(result.stats.retries, 0);

    let mut ids: Vec<String> = indexed_documents(&server)
        .await
        .iter()
        .map(|doc| {
            assert!(doc.get("_version_").is_none());
            doc["id"].as_str().unwrap().to_string()
        })
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_export_reindex_when_fields_have_doc_values() {
    // Arrange
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("/solr/{SOURCE}/schema/uniquekey")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uniqueKey": "id"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/solr/{SOURCE}/schema/fields")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"fields": [
            {"name": "id", "type": "string", "docValues": true},
            {"name": "title", "type": "string", "docValues": "true"}
        ]})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/solr/{CORE}/export")))
        .and(query_param("fl", "id,title"))
        .and(query_param("distrib", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"responseHeader":{"status":0},"response":{"numFound":2,"docs":[{"id":"1","title":"a","_version_":1},{"id":"2","title":"b"}]}}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    mount_update_ok(&server).await;
    let request = request(&server, 10)
        .with_fields(FieldSelection::fields(vec!["id".to_string(), "title".to_string()]).unwrap());

    // Act
    let result = ReindexService::new()
        .reindex(&request, Duration::from_secs(10))
        .await
        .unwrap();

    // Assert
    assert!(result.export_mode_used);
    assert!(result.warnings.is_empty());
    assert_eq!(result.stats.docs_indexed, 2);
    assert_eq!(result.stats.batches_sent, 1);
    let docs = indexed_documents(&server).await;
    assert_eq!(docs.len(), 2);
    assert!(docs.iter().all(|doc| doc.get("_version_").is_none()));
}

#[tokio::test]
async fn test_transient_update_failure_is_retried() {
    // Arrange
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("/solr/{CORE}/select")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {"docs": [{"id": "1"}]},
            "nextCursorMark": "*"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/solr/{TARGET}/update")))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_update_ok(&server).await;

    // Act
    let result = ReindexService::new()
        .reindex(&request(&server, 5), Duration::from_secs(10))
        .await
        .unwrap();

    // Assert
    assert_eq!(result.stats.retries, 1);
    assert_eq!(result.stats.docs_indexed, 1);
}

#[tokio::test]
async fn test_rejected_update_fails_in_write_stage() {
    // Arrange
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("/solr/{CORE}/select")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {"docs": [{"id": "1"}]},
            "nextCursorMark": "*"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/solr/{TARGET}/update")))
        .respond_with(ResponseTemplate::new(400).set_body_string("unknown field 'title'"))
        .expect(1)
        .mount(&server)
        .await;

    // Act
    let err = ReindexService::new()
        .reindex(&request(&server, 5), Duration::from_secs(10))
        .await
        .unwrap_err();

    // Assert
    assert_eq!(err.stage(), Some(Stage::WriteBatch));
    assert!(matches!(err.root_cause(), Error::Remote { status: 400, .. }));
}

#[tokio::test]
async fn test_unknown_shard_fails_discovery() {
    // Arrange
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    let request = request(&server, 5).with_filters(
        ReindexFilters::new(None, vec![], vec!["shard9".to_string()]),
    );

    // Act
    let err = ReindexService::new()
        .reindex(&request, Duration::from_secs(10))
        .await
        .unwrap_err();

    // Assert
    assert_eq!(err.stage(), Some(Stage::Discovery));
    assert!(matches!(err.root_cause(), Error::UnknownShards { .. }));
}

#[tokio::test]
async fn test_deadline_exceeded_abandons_run() {
    // Arrange
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("/solr/{CORE}/select")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"response": {"docs": []}, "nextCursorMark": "*"}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    // Act
    let err = ReindexService::new()
        .reindex(&request(&server, 5), Duration::from_millis(200))
        .await
        .unwrap_err();

    // Assert
    assert!(matches!(err, Error::DeadlineExceeded(_)));
    assert_eq!(err.code(), "REINDEX-014");
}

/// Mounts a source shard whose cursor keeps advancing forever; returns the
/// number of pages served so far.
async fn mount_endless_shard(server: &MockServer) -> Arc<AtomicUsize> {
    let pages = Arc::new(AtomicUsize::new(0));
    let served = Arc::clone(&pages);
    Mock::given(method("GET"))
        .and(path(format!("/solr/{CORE}/select")))
        .respond_with(move |_: &wiremock::Request| {
            let page = served.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(200).set_body_json(json!({
                "response": {"docs": [{"id": format!("a{page}")}, {"id": format!("b{page}")}]},
                "nextCursorMark": format!("mark{page}")
            }))
        })
        .mount(server)
        .await;
    pages
}

/// Page count once it has stopped moving.
async fn settled_pages(pages: &AtomicUsize) -> usize {
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = pages.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pages.load(Ordering::SeqCst), settled, "source still being paged");
    settled
}

#[tokio::test]
async fn test_deadline_stops_source_paging() {
    // Arrange
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    let pages = mount_endless_shard(&server).await;
    Mock::given(method("POST"))
        .and(path(format!("/solr/{TARGET}/update")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"responseHeader": {"status": 0}}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    // Act
    let err = ReindexService::new()
        .reindex(&request(&server, 5), Duration::from_millis(300))
        .await
        .unwrap_err();

    // Assert
    assert!(matches!(err, Error::DeadlineExceeded(_)));
    assert!(settled_pages(&pages).await > 0);
}

#[tokio::test]
async fn test_write_failure_stops_source_paging() {
    // Arrange
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    let pages = mount_endless_shard(&server).await;
    Mock::given(method("POST"))
        .and(path(format!("/solr/{TARGET}/update")))
        .respond_with(
            ResponseTemplate::new(400).set_body_string("document is missing mandatory uniqueKey field"),
        )
        .mount(&server)
        .await;

    // Act
    let err = ReindexService::new()
        .reindex(&request(&server, 5), Duration::from_secs(10))
        .await
        .unwrap_err();

    // Assert
    assert_eq!(err.stage(), Some(Stage::WriteBatch));
    assert!(settled_pages(&pages).await > 0);
}
