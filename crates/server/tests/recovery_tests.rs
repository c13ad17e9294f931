//! Integration tests for rebuilding the catalog from the object store.

mod common;

use axum::http::{Method, StatusCode};
use bytes::Bytes;
use common::TestServer;
use common::fixtures::*;
use serde_json::{Value, json};

async fn recover(server: &TestServer) -> Value {
    let (status, report) = server.json(Method::POST, "/v1/admin/recover", None).await;
    assert_eq!(status, StatusCode::OK, "{report}");
    report
}

fn recovered<'a>(report: &'a Value, name: &str) -> &'a Value {
    report["recovered"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["name"] == name)
        .unwrap_or_else(|| panic!("{name} not recovered: {report}"))
}

#[tokio::test]
async fn test_rebuild_restores_archived_and_uploading_sequences() {
    let server = TestServer::with_config(|config| config.ingest.max_chunk_rows = 100).await;

    let archived = create_sequence(&server, "drive-01").await;
    let imu = create_topic(&server, &archived, "imu", "imu").await;
    ingest(&server, &imu, "imu", imu_records(0, 250, |ts| if ts == 120 { 9.0 } else { 1.0 })).await;
    finalize(&server, &archived).await;

    let live = create_sequence(&server, "drive-02").await;
    let live_imu = create_topic(&server, &live, "imu", "imu").await;
    ingest(&server, &live_imu, "imu", imu_records(0, 40, |_| 1.0)).await;

    server.clear_catalog().await;
    let (_, list) = server.action("sequence_list", json!({})).await;
    assert!(list.as_array().unwrap().is_empty());

    let report = recover(&server).await;
    assert!(report["errors"].as_array().unwrap().is_empty(), "{report}");

    let entry = recovered(&report, "drive-01");
    assert_eq!(entry["state"], "archived");
    assert_eq!(entry["topics"], 1);
    assert_eq!(entry["chunks"], 3);
    assert!(entry.get("write_token").is_none());
    assert!(entry.get("topic_tokens").is_none());

    let (status, info) = server
        .action("topic_system_info", json!({"topic_id": imu.id}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["locator"], "drive-01/imu");
    assert_eq!(info["chunk_count"], 3);
    assert_eq!(info["row_count"], 250);
    assert_eq!(info["user_metadata"], json!({"mount": "roof"}));

    let (_, info) = server
        .action("sequence_system_info", json!({"sequence_id": archived.id}))
        .await;
    assert_eq!(info["state"], "archived");
    assert_eq!(info["user_metadata"], json!({"driver": "alice", "run": 1}));

    // Skip indices are rebuilt, so pruning and verification still apply.
    let (_, response) = server
        .action(
            "query",
            json!({
                "ontology": {"imu.acceleration.x": {"$gt": 5.0}},
                "include_timestamp_range": true,
            }),
        )
        .await;
    assert_eq!(
        response,
        json!({"items": [{
            "sequence": "drive-01",
            "topics": [{"locator": "drive-01/imu", "timestamp_range": {"start": 100, "end": 199}}],
        }]})
    );

    let entry = recovered(&report, "drive-02");
    assert_eq!(entry["state"], "uploading");
    assert_eq!(entry["chunks"], 1);
    let sequence_token = entry["write_token"].as_str().unwrap().to_string();
    let topic_token = entry["topic_tokens"]["imu"].as_str().unwrap().to_string();

    // Tokens issued before the rebuild are gone.
    let (status, _) = server
        .action(
            "sequence_finalize",
            json!({"sequence_id": live.id, "write_token": live.token}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, summary) = server
        .ingest(
            &live_imu.id,
            &topic_token,
            ndjson_batches("imu", &[imu_records(40, 60, |_| 1.0)]),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{summary}");
    let keys = server
        .stored_keys(&format!("sequences/{}/topics/{}/chunks/", live.id, live_imu.id))
        .await;
    assert_eq!(keys.len(), 2);
    assert!(keys[1].ends_with("00000001.ndjson"));

    let (status, _) = server
        .action(
            "sequence_finalize",
            json!({"sequence_id": live.id, "write_token": sequence_token}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_rebuild_is_idempotent() {
    let server = TestServer::new().await;
    let seq = create_sequence(&server, "s1").await;
    let topic = create_topic(&server, &seq, "imu", "imu").await;
    ingest(&server, &topic, "imu", imu_records(0, 10, |_| 1.0)).await;
    finalize(&server, &seq).await;

    // Nothing is missing from the catalog.
    let report = recover(&server).await;
    assert!(report["recovered"].as_array().unwrap().is_empty());
    assert_eq!(report["skipped_existing"], json!([seq.id]));

    server.clear_catalog().await;
    let first = recover(&server).await;
    assert_eq!(first["recovered"].as_array().unwrap().len(), 1);
    let second = recover(&server).await;
    assert!(second["recovered"].as_array().unwrap().is_empty());
    assert_eq!(second["skipped_existing"], json!([seq.id]));

    let (_, info) = server
        .action("topic_system_info", json!({"topic_id": topic.id}))
        .await;
    assert_eq!(info["chunk_count"], 1);
}

#[tokio::test]
async fn test_rebuild_reports_orphans_and_conflicts() {
    let server = TestServer::new().await;
    let seq = create_sequence(&server, "s1").await;
    let topic = create_topic(&server, &seq, "imu", "imu").await;
    ingest(&server, &topic, "imu", imu_records(0, 10, |_| 1.0)).await;
    finalize(&server, &seq).await;

    server
        .state
        .storage
        .put("sequences/readme.txt", Bytes::from_static(b"stray"))
        .await
        .unwrap();

    server.clear_catalog().await;
    // Another sequence claims the name before the rebuild runs.
    let squatter = create_sequence(&server, "s1").await;

    let report = recover(&server).await;
    assert!(report["recovered"].as_array().unwrap().is_empty());
    assert_eq!(report["conflicts"], json!(["s1"]));
    assert_eq!(report["skipped_existing"], json!([squatter.id]));
    assert!(
        report["orphans"]
            .as_array()
            .unwrap()
            .contains(&json!("sequences/readme.txt"))
    );

    let (status, _) = server
        .action("topic_system_info", json!({"topic_id": topic.id}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rebuild_skips_deleted_sequences() {
    let server = TestServer::new().await;
    let seq = create_sequence(&server, "s1").await;
    let topic = create_topic(&server, &seq, "imu", "imu").await;
    ingest(&server, &topic, "imu", imu_records(0, 10, |_| 1.0)).await;

    let (status, _) = server
        .action(
            "sequence_delete",
            json!({"sequence_id": seq.id, "write_token": seq.token}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(wait_until_collected(&server, &format!("sequences/{}/", seq.id)).await);

    let report = recover(&server).await;
    assert!(report["recovered"].as_array().unwrap().is_empty());
    let (_, list) = server.action("sequence_list", json!({})).await;
    assert!(list.as_array().unwrap().is_empty());
}
