//! Integration tests for the sequence and topic lifecycle.

mod common;

use axum::http::StatusCode;
use common::TestServer;
use common::fixtures::*;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_same_name_admits_one_creator() {
    let server = TestServer::new().await;

    let attempts = (0..8).map(|_| server.action("sequence_create", json!({"name": "s1"})));
    let results = futures::future::join_all(attempts).await;

    let created: Vec<_> = results
        .iter()
        .filter(|(status, _)| *status == StatusCode::CREATED)
        .collect();
    assert_eq!(created.len(), 1);
    for (status, body) in results.iter().filter(|(s, _)| *s != StatusCode::CREATED) {
        assert_eq!(*status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "name_conflict");
        assert!(body.get("write_token").is_none());
    }

    let (_, list) = server.action("sequence_list", json!({})).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_archived_sequence_rejects_mutation() {
    let server = TestServer::new().await;
    let seq = create_sequence(&server, "s1").await;
    let topic = create_topic(&server, &seq, "imu", "imu").await;
    ingest(&server, &topic, "imu", imu_records(0, 10, |_| 1.0)).await;
    finalize(&server, &seq).await;

    let (status, body) = server
        .action(
            "topic_create",
            json!({
                "sequence_id": seq.id,
                "write_token": seq.token,
                "path": "gps",
                "ontology_tag": "gps",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "resource_locked");

    let (status, _) = server
        .action(
            "topic_delete",
            json!({"topic_id": topic.id, "write_token": topic.token}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = server
        .ingest(
            &topic.id,
            &topic.token,
            ndjson_batches("imu", &[imu_records(10, 20, |_| 1.0)]),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "resource_locked");

    let (status, _) = server
        .action(
            "sequence_delete",
            json!({"sequence_id": seq.id, "write_token": seq.token}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, info) = server
        .action("topic_system_info", json!({"topic_id": topic.id}))
        .await;
    assert_eq!(info["chunk_count"], 1);
    assert_eq!(info["row_count"], 10);
    assert_eq!(info["is_locked"], true);
}

#[tokio::test]
async fn test_second_finalize_is_locked_without_side_effects() {
    let server = TestServer::new().await;
    let seq = create_sequence(&server, "s1").await;
    let topic = create_topic(&server, &seq, "imu", "imu").await;
    ingest(&server, &topic, "imu", imu_records(0, 5, |_| 1.0)).await;
    finalize(&server, &seq).await;
    let chunks_before = server.stored_keys(&format!("sequences/{}/", seq.id)).await;

    for _ in 0..2 {
        let (status, body) = server
            .action(
                "sequence_finalize",
                json!({"sequence_id": seq.id, "write_token": seq.token}),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "resource_locked");
    }
    assert_eq!(
        server.stored_keys(&format!("sequences/{}/", seq.id)).await,
        chunks_before
    );
}

#[tokio::test]
async fn test_finalize_flushes_partial_buffers() {
    let server = TestServer::new().await;
    let seq = create_sequence(&server, "s1").await;
    let topic = create_topic(&server, &seq, "imu", "imu").await;

    // A writer dropped before close keeps its rows buffered.
    {
        let mut writer = server
            .state
            .ingestor
            .open(
                sextant_core::TopicId::parse(&topic.id).unwrap(),
                sextant_core::WriteToken::parse(&topic.token).unwrap(),
            )
            .await
            .unwrap();
        writer
            .push_batch(imu_records(0, 7, |_| 1.0))
            .await
            .unwrap();
    }
    let (_, info) = server
        .action("topic_system_info", json!({"topic_id": topic.id}))
        .await;
    assert_eq!(info["chunk_count"], 0);
    assert_eq!(server.state.ingestor.lane_count(), 1);

    finalize(&server, &seq).await;
    assert_eq!(server.state.ingestor.lane_count(), 0);
    let (_, info) = server
        .action("topic_system_info", json!({"topic_id": topic.id}))
        .await;
    assert_eq!(info["chunk_count"], 1);
    assert_eq!(info["row_count"], 7);
    assert_eq!(info["timestamp_range"], json!({"start": 0, "end": 6}));

    let (_, info) = server
        .action("sequence_system_info", json!({"sequence_id": seq.id}))
        .await;
    assert_eq!(info["state"], "archived");
    assert_eq!(info["is_locked"], true);
    assert_eq!(info["topic_count"], 1);

    // Refused writes to the archived topic leave no lane behind.
    let (status, _) = server
        .ingest(&topic.id, &topic.token, ndjson_batches("imu", &[imu_records(7, 9, |_| 1.0)]))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(server.state.ingestor.lane_count(), 0);
}

#[tokio::test]
async fn test_abort_purges_rows_and_objects() {
    let server = TestServer::new().await;
    let seq = create_sequence(&server, "s1").await;
    let topic = create_topic(&server, &seq, "imu", "imu").await;
    ingest(&server, &topic, "imu", imu_records(0, 50, |_| 2.0)).await;
    let prefix = format!("sequences/{}/", seq.id);
    assert!(!server.stored_keys(&prefix).await.is_empty());

    let (status, body) = server
        .action(
            "sequence_abort",
            json!({"sequence_id": seq.id, "write_token": seq.token}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    assert!(server.stored_keys(&prefix).await.is_empty());
    let (status, _) = server
        .action("sequence_system_info", json!({"sequence_id": seq.id}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = server
        .action("topic_system_info", json!({"topic_id": topic.id}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The name is free again.
    create_sequence(&server, "s1").await;
}

#[tokio::test]
async fn test_mutation_requires_matching_token() {
    let server = TestServer::new().await;
    let seq = create_sequence(&server, "s1").await;
    let topic = create_topic(&server, &seq, "imu", "imu").await;

    for token in [Uuid::new_v4().to_string(), "garbage".to_string(), topic.token.clone()] {
        let (status, body) = server
            .action(
                "sequence_finalize",
                json!({"sequence_id": seq.id, "write_token": token}),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{token}");
        assert_eq!(body["code"], "invalid_token");
    }

    // The sequence token does not open a topic.
    let (status, _) = server
        .action(
            "topic_delete",
            json!({"topic_id": topic.id, "write_token": seq.token}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = server
        .ingest(
            &topic.id,
            &seq.token,
            ndjson_batches("imu", &[imu_records(0, 2, |_| 0.0)]),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_missing_token_is_invalid() {
    let server = TestServer::new().await;
    let seq = create_sequence(&server, "s1").await;
    let topic = create_topic(&server, &seq, "imu", "imu").await;

    let requests = [
        ("sequence_finalize", json!({"sequence_id": seq.id})),
        ("sequence_abort", json!({"sequence_id": seq.id})),
        ("sequence_delete", json!({"sequence_id": seq.id})),
        ("sequence_finalize", json!({"sequence_id": seq.id, "write_token": ""})),
        ("sequence_abort", json!({"sequence_id": seq.id, "write_token": null})),
        (
            "topic_create",
            json!({"sequence_id": seq.id, "path": "gps", "ontology_tag": "gps"}),
        ),
        ("topic_delete", json!({"topic_id": topic.id})),
        ("topic_delete", json!({"topic_id": topic.id, "write_token": "  "})),
    ];
    for (action, body) in requests {
        let (status, response) = server.action(action, body.clone()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{action} {body}");
        assert_eq!(response["code"], "invalid_token", "{action} {body}");
    }

    // Nothing changed.
    let (_, info) = server
        .action("sequence_system_info", json!({"sequence_id": seq.id}))
        .await;
    assert_eq!(info["state"], "uploading");
    assert_eq!(info["topic_count"], 1);
    finalize(&server, &seq).await;
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let server = TestServer::new().await;
    let id = Uuid::new_v4().to_string();

    let (status, body) = server
        .action(
            "sequence_finalize",
            json!({"sequence_id": id, "write_token": Uuid::new_v4().to_string()}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, _) = server
        .action("sequence_system_info", json!({"sequence_id": "not-a-uuid"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_sequence_is_collected() {
    let server = TestServer::new().await;
    let seq = create_sequence(&server, "s1").await;
    let topic = create_topic(&server, &seq, "imu", "imu").await;
    ingest(&server, &topic, "imu", imu_records(0, 20, |_| 1.0)).await;

    let (status, body) = server
        .action(
            "sequence_delete",
            json!({"sequence_id": seq.id, "write_token": seq.token}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (_, list) = server.action("sequence_list", json!({})).await;
    assert!(list.as_array().unwrap().is_empty());
    assert!(wait_until_collected(&server, &format!("sequences/{}/", seq.id)).await);

    let again = create_sequence(&server, "s1").await;
    assert_ne!(again.id, seq.id);
}

#[tokio::test]
async fn test_delete_topic_with_topic_token() {
    let server = TestServer::new().await;
    let seq = create_sequence(&server, "s1").await;
    let imu = create_topic(&server, &seq, "imu", "imu").await;
    let gps = create_topic(&server, &seq, "s1/gps/front", "gps").await;
    ingest(&server, &imu, "imu", imu_records(0, 5, |_| 1.0)).await;

    let (status, body) = server
        .action(
            "topic_delete",
            json!({"topic_id": imu.id, "write_token": imu.token}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(wait_until_collected(&server, &format!("sequences/{}/topics/{}/", seq.id, imu.id)).await);

    let (_, info) = server
        .action("topic_system_info", json!({"topic_id": gps.id}))
        .await;
    assert_eq!(info["locator"], "s1/gps/front");

    // The freed path can be reused.
    create_topic(&server, &seq, "imu", "imu").await;
}

#[tokio::test]
async fn test_topic_create_validates_input() {
    let server = TestServer::new().await;
    let seq = create_sequence(&server, "s1").await;
    create_topic(&server, &seq, "imu", "imu").await;

    let topic = |path: &str, tag: &str| {
        json!({
            "sequence_id": seq.id,
            "write_token": seq.token,
            "path": path,
            "ontology_tag": tag,
        })
    };

    let (status, body) = server.action("topic_create", topic("s1/imu", "imu")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "name_conflict");

    let (status, _) = server.action("topic_create", topic("../etc", "imu")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // An unregistered tag needs an explicit schema.
    let (status, _) = server.action("topic_create", topic("lidar", "lidar_v9")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut custom = topic("lidar", "lidar_v9");
    custom["schema"] = json!({"fields": [
        {"path": "points", "kind": "int", "nullable": false}
    ]});
    let (status, body) = server.action("topic_create", custom).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
}

#[tokio::test]
async fn test_notifications_follow_their_resource() {
    let server = TestServer::new().await;
    let seq = create_sequence(&server, "s1").await;
    let topic = create_topic(&server, &seq, "imu", "imu").await;

    for (severity, message) in [("warning", "gps dropout"), ("error", "disk full")] {
        let (status, _) = server
            .action(
                "sequence_notify_create",
                json!({"resource_id": seq.id, "severity": severity, "message": message}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, _) = server
        .action(
            "topic_notify_create",
            json!({"resource_id": topic.id, "severity": "info", "message": "calibrated"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    finalize(&server, &seq).await;

    // Allowed on an archived sequence.
    let (status, _) = server
        .action(
            "sequence_notify_create",
            json!({"resource_id": seq.id, "severity": "info", "message": "archived"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, list) = server
        .action("sequence_notify_list", json!({"resource_id": seq.id}))
        .await;
    let messages: Vec<_> = list
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["message"].as_str().unwrap())
        .collect();
    assert_eq!(messages, ["gps dropout", "disk full", "archived"]);

    let (_, purged) = server
        .action("sequence_notify_purge", json!({"resource_id": seq.id}))
        .await;
    assert_eq!(purged["purged"], 3);
    let (_, list) = server
        .action("sequence_notify_list", json!({"resource_id": seq.id}))
        .await;
    assert!(list.as_array().unwrap().is_empty());

    let (_, list) = server
        .action("topic_notify_list", json!({"resource_id": topic.id}))
        .await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, _) = server
        .action(
            "topic_notify_create",
            json!({"resource_id": Uuid::new_v4().to_string(), "severity": "info", "message": "x"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
