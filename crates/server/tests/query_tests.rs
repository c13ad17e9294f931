//! Integration tests for the three-layer query.

mod common;

use axum::http::StatusCode;
use common::TestServer;
use common::fixtures::*;
use serde_json::{Value, json};

/// Sequence `s1` with one IMU topic of chunks `[0,100)`, `[100,200)`, `[200,300)`.
/// Acceleration spikes to 12.0 between 150 and 160.
async fn imu_scenario() -> TestServer {
    let server = TestServer::with_config(|config| config.ingest.max_chunk_rows = 100).await;
    let seq = create_sequence(&server, "s1").await;
    let topic = create_topic(&server, &seq, "imu", "imu").await;
    let records = imu_records(0, 300, |ts| if (150..160).contains(&ts) { 12.0 } else { 1.0 });
    let summary = ingest(&server, &topic, "imu", records).await;
    assert_eq!(summary["chunks_written"], 3);
    finalize(&server, &seq).await;
    server
}

async fn query(server: &TestServer, filter: Value) -> Value {
    let (status, body) = server.action("query", filter).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body
}

fn sequence_names(response: &Value) -> Vec<&str> {
    response["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["sequence"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn test_ontology_match_reports_chunk_window() {
    let server = imu_scenario().await;

    let response = query(
        &server,
        json!({
            "ontology": {"imu.acceleration.x": {"$gt": 5.0}},
            "include_timestamp_range": true,
        }),
    )
    .await;
    assert_eq!(
        response,
        json!({"items": [{
            "sequence": "s1",
            "topics": [{"locator": "s1/imu", "timestamp_range": {"start": 100, "end": 199}}],
        }]})
    );

    let range = &response["items"][0]["topics"][0]["timestamp_range"];
    let (start, end) = (range["start"].as_i64().unwrap(), range["end"].as_i64().unwrap());
    assert!(start <= 150 && 159 <= end);
    assert!(0 <= start && end < 300);
}

#[tokio::test]
async fn test_ontology_without_match_is_absent() {
    let server = imu_scenario().await;

    let response = query(
        &server,
        json!({"ontology": {"imu.acceleration.x": {"$gt": 50.0}}}),
    )
    .await;
    assert_eq!(response, json!({"items": []}));

    // A field the topic does not have excludes it.
    let response = query(
        &server,
        json!({"ontology": {"gps.latitude": {"$gt": 0.0}}}),
    )
    .await;
    assert_eq!(response, json!({"items": []}));
}

#[tokio::test]
async fn test_range_is_omitted_unless_requested() {
    let server = imu_scenario().await;

    let response = query(
        &server,
        json!({"ontology": {"acceleration.x": {"$between": [11.0, 13.0]}}}),
    )
    .await;
    assert_eq!(
        response["items"][0]["topics"],
        json!([{"locator": "s1/imu"}])
    );

    // Without an ontology layer the range spans the whole topic.
    let response = query(&server, json!({"include_timestamp_range": true})).await;
    assert_eq!(
        response["items"][0]["topics"][0]["timestamp_range"],
        json!({"start": 0, "end": 299})
    );
}

#[tokio::test]
async fn test_sequence_and_topic_layers() {
    let server = imu_scenario().await;
    let s2 = create_sequence(&server, "s2-night").await;
    create_topic(&server, &s2, "front/gps", "gps").await;

    let all = query(&server, json!({})).await;
    assert_eq!(sequence_names(&all), ["s1", "s2-night"]);

    let archived = query(&server, json!({"sequence": {"state": {"$eq": "archived"}}})).await;
    assert_eq!(sequence_names(&archived), ["s1"]);

    let night = query(&server, json!({"sequence": {"name": {"$match": "night"}}})).await;
    assert_eq!(sequence_names(&night), ["s2-night"]);

    let by_driver = query(
        &server,
        json!({"sequence": {"user_metadata": {"driver": {"$eq": "alice"}}}}),
    )
    .await;
    assert_eq!(sequence_names(&by_driver), ["s1", "s2-night"]);

    let gps = query(&server, json!({"topic": {"ontology_tag": {"$in": ["gps", "lidar"]}}})).await;
    assert_eq!(
        gps,
        json!({"items": [{"sequence": "s2-night", "topics": [{"locator": "s2-night/front/gps"}]}]})
    );

    let mounted = query(&server, json!({"topic": {"user_metadata.mount": {"$eq": "roof"}}})).await;
    assert_eq!(sequence_names(&mounted), ["s1", "s2-night"]);

    // Layers combine conjunctively.
    let none = query(
        &server,
        json!({
            "sequence": {"name": {"$eq": "s1"}},
            "topic": {"ontology_tag": {"$eq": "gps"}},
        }),
    )
    .await;
    assert_eq!(none, json!({"items": []}));
}

#[tokio::test]
async fn test_malformed_filter_is_rejected() {
    let server = TestServer::new().await;

    for filter in [
        json!({"ontology": {"imu.acceleration.x": {"$near": 5.0}}}),
        json!({"ontology": {"imu.acceleration.x": {"$gt": 5.0, "$lt": 9.0}}}),
        json!({"sequence": {"colour": {"$eq": "red"}}}),
        json!({"ontology": {"imu.acceleration.x": {"$between": [9.0, 1.0]}}}),
        json!({"include_timestamp_range": "yes"}),
        json!({"everything": {}}),
        json!([1, 2]),
    ] {
        let (status, body) = server.action("query", filter.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{filter}");
        assert_eq!(body["code"], "malformed_filter", "{filter}");
    }
}

#[tokio::test]
async fn test_uploading_sequences_are_queryable_and_aborted_are_not() {
    let server = TestServer::new().await;
    let live = create_sequence(&server, "live").await;
    let topic = create_topic(&server, &live, "imu", "imu").await;
    ingest(&server, &topic, "imu", imu_records(0, 10, |_| 7.0)).await;

    let gone = create_sequence(&server, "gone").await;
    let (status, _) = server
        .action(
            "sequence_abort",
            json!({"sequence_id": gone.id, "write_token": gone.token}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let response = query(&server, json!({"ontology": {"imu.acceleration.x": {"$geq": 7.0}}})).await;
    assert_eq!(sequence_names(&response), ["live"]);
    let response = query(&server, json!({})).await;
    assert_eq!(sequence_names(&response), ["live"]);
}

/// One chunk where each condition holds on a different row.
async fn split_conditions(verify_candidates: bool) -> Value {
    let server =
        TestServer::with_config(|config| config.query.verify_candidates = verify_candidates).await;
    let seq = create_sequence(&server, "s1").await;
    let topic = create_topic(&server, &seq, "imu", "imu").await;

    let mut fast = imu_record(0, 10.0);
    fast["angular_velocity"]["z"] = json!(0.1);
    let mut spinning = imu_record(1, 1.0);
    spinning["angular_velocity"]["z"] = json!(2.0);
    ingest(&server, &topic, "imu", vec![fast, spinning]).await;

    query(
        &server,
        json!({"ontology": {
            "imu.acceleration.x": {"$gt": 5.0},
            "imu.angular_velocity.z": {"$gt": 1.0},
        }}),
    )
    .await
}

#[tokio::test]
async fn test_statistics_alone_admit_false_positives() {
    let response = split_conditions(false).await;
    assert_eq!(sequence_names(&response), ["s1"]);
}

#[tokio::test]
async fn test_verification_removes_false_positives() {
    let response = split_conditions(true).await;
    assert_eq!(response, json!({"items": []}));
}

#[tokio::test]
async fn test_timestamp_condition_prunes_by_chunk() {
    let server = imu_scenario().await;
    let response = query(
        &server,
        json!({
            "ontology": {"imu.timestamp_ns": {"$geq": 250}},
            "include_timestamp_range": true,
        }),
    )
    .await;
    assert_eq!(
        response["items"][0]["topics"][0]["timestamp_range"],
        json!({"start": 200, "end": 299})
    );
}

#[tokio::test]
async fn test_tagged_and_bare_paths_to_one_field_are_malformed() {
    let server = imu_scenario().await;
    let (status, body) = server
        .action(
            "query",
            json!({"ontology": {
                "imu.acceleration.x": {"$gt": 5.0},
                "acceleration.x": {"$lt": 20.0},
            }}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["code"], "malformed_filter");
}
