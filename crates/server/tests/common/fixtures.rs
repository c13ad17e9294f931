//! Test fixtures and data generators.

use super::server::TestServer;
use axum::http::StatusCode;
use serde_json::{Value, json};
use sextant_core::OntologyRegistry;

/// Id and write token of a created resource.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct Created {
    pub id: String,
    pub token: String,
}

/// Create a sequence and return its id and token.
#[allow(dead_code)]
pub async fn create_sequence(server: &TestServer, name: &str) -> Created {
    let (status, body) = server
        .action(
            "sequence_create",
            json!({"name": name, "user_metadata": {"driver": "alice", "run": 1}}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    Created {
        id: body["sequence_id"].as_str().unwrap().to_string(),
        token: body["write_token"].as_str().unwrap().to_string(),
    }
}

/// Create a topic with a registered ontology tag.
#[allow(dead_code)]
pub async fn create_topic(server: &TestServer, sequence: &Created, path: &str, tag: &str) -> Created {
    let (status, body) = server
        .action(
            "topic_create",
            json!({
                "sequence_id": sequence.id,
                "write_token": sequence.token,
                "path": path,
                "ontology_tag": tag,
                "user_metadata": {"mount": "roof"},
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    Created {
        id: body["topic_id"].as_str().unwrap().to_string(),
        token: body["write_token"].as_str().unwrap().to_string(),
    }
}

/// Finalize a sequence, asserting success.
#[allow(dead_code)]
pub async fn finalize(server: &TestServer, sequence: &Created) {
    let (status, body) = server
        .action(
            "sequence_finalize",
            json!({"sequence_id": sequence.id, "write_token": sequence.token}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

/// Schema descriptor line of a registered tag.
#[allow(dead_code)]
pub fn descriptor(tag: &str) -> String {
    let entry = OntologyRegistry::builtin().get(tag).unwrap();
    serde_json::to_string(&entry.schema).unwrap()
}

/// One IMU record.
#[allow(dead_code)]
pub fn imu_record(timestamp_ns: i64, accel_x: f64) -> Value {
    json!({
        "timestamp_ns": timestamp_ns,
        "acceleration": {"x": accel_x, "y": 0.0, "z": 9.81},
        "angular_velocity": {"x": 0.0, "y": 0.0, "z": 0.1},
    })
}

/// IMU records with timestamps in `[start, end)`.
#[allow(dead_code)]
pub fn imu_records(start: i64, end: i64, accel_x: impl Fn(i64) -> f64) -> Vec<Value> {
    (start..end).map(|ts| imu_record(ts, accel_x(ts))).collect()
}

/// Build an ingest body: descriptor line, then one line per batch.
#[allow(dead_code)]
pub fn ndjson_batches(tag: &str, batches: &[Vec<Value>]) -> String {
    let mut body = descriptor(tag);
    body.push('\n');
    for batch in batches {
        body.push_str(&Value::Array(batch.clone()).to_string());
        body.push('\n');
    }
    body
}

/// Ingest records into a topic and return the summary.
#[allow(dead_code)]
pub async fn ingest(server: &TestServer, topic: &Created, tag: &str, records: Vec<Value>) -> Value {
    let (status, body) = server
        .ingest(&topic.id, &topic.token, ndjson_batches(tag, &[records]))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body
}

/// Wait for the background sweep to empty a prefix.
#[allow(dead_code)]
pub async fn wait_until_collected(server: &TestServer, prefix: &str) -> bool {
    for _ in 0..100 {
        if server.stored_keys(prefix).await.is_empty() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    false
}
