//! Server test utilities.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use bytes::Bytes;
use serde_json::Value;
use sextant_core::config::{AppConfig, MetadataConfig, StorageConfig};
use sextant_metadata::{MetadataStore, SqliteStore};
use sextant_server::{AppState, create_router};
use sextant_storage::{FilesystemBackend, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    /// Concrete catalog handle, for clearing it between steps.
    pub catalog: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        // Create storage
        let storage_path = temp_dir.path().join("storage");
        std::fs::create_dir_all(&storage_path).expect("Failed to create storage directory");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        // Create metadata
        let db_path = temp_dir.path().join("catalog.db");
        let catalog = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );
        let metadata: Arc<dyn MetadataStore> = catalog.clone();

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig::Filesystem {
            path: storage_path,
        };
        config.metadata = MetadataConfig::Sqlite {
            path: db_path,
            query_timeout_secs: None,
        };
        modifier(&mut config);

        let state = AppState::new(config, storage, metadata);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            catalog,
            _temp_dir: temp_dir,
        }
    }

    /// Drop every catalog row, keeping the object store.
    pub async fn clear_catalog(&self) {
        self.catalog.clear().await.expect("Failed to clear catalog");
    }

    /// Send a request and return the status with the raw body.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body)
    }

    /// Send a JSON request and decode the JSON response.
    pub async fn json(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let (status, bytes) = self.send(request).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Run an administrative action.
    pub async fn action(&self, action: &str, body: Value) -> (StatusCode, Value) {
        self.json(Method::POST, &format!("/v1/actions/{action}"), Some(body))
            .await
    }

    /// Stream an NDJSON body into a topic.
    pub async fn ingest(&self, topic_id: &str, token: &str, body: String) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::PUT)
            .uri(format!("/v1/topics/{topic_id}/stream"))
            .header("x-sextant-write-token", token)
            .header("content-type", "application/x-ndjson")
            .body(Body::from(body))
            .unwrap();
        let (status, bytes) = self.send(request).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    /// Fetch a retrieval stream and split it into JSON lines.
    pub async fn stream_lines(&self, handle: &str) -> (StatusCode, Vec<Value>) {
        let request = Request::builder()
            .method(Method::GET)
            .uri(format!("/v1/streams/{handle}"))
            .body(Body::empty())
            .unwrap();
        let (status, bytes) = self.send(request).await;
        let lines = bytes
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).unwrap())
            .collect();
        (status, lines)
    }

    /// Keys currently stored under a prefix.
    pub async fn stored_keys(&self, prefix: &str) -> Vec<String> {
        self.state.storage.list(prefix).await.unwrap()
    }
}
