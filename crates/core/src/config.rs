//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default row threshold at which a chunk is closed.
pub const DEFAULT_MAX_CHUNK_ROWS: u64 = 65_536;

/// Default encoded-size threshold at which a chunk is closed: 16 MiB.
pub const DEFAULT_MAX_CHUNK_BYTES: u64 = 16 * 1024 * 1024;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Endpoint name advertised in retrieval tickets.
    #[serde(default = "default_public_endpoint")]
    pub public_endpoint: String,
    /// Enable the /metrics endpoint for Prometheus scraping.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Longest accepted NDJSON line on the ingestion stream.
    #[serde(default = "default_max_ingest_line_bytes")]
    pub max_ingest_line_bytes: usize,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_public_endpoint() -> String {
    "/v1/streams".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_max_ingest_line_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_endpoint: default_public_endpoint(),
            metrics_enabled: default_metrics_enabled(),
            max_ingest_line_bytes: default_max_ingest_line_bytes(),
        }
    }
}

/// Compression applied to stored chunk payloads.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionConfig {
    /// No compression.
    None,
    /// Zstd compression (recommended: fast, good ratio).
    #[default]
    Zstd,
    /// XZ compression (slow but high ratio).
    Xz,
}

impl CompressionConfig {
    /// File extension appended to chunk object keys.
    pub fn extension(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Zstd => ".zst",
            Self::Xz => ".xz",
        }
    }

    /// Recover the codec from a chunk object key.
    pub fn from_key(key: &str) -> Self {
        if key.ends_with(".zst") {
            Self::Zstd
        } else if key.ends_with(".xz") {
            Self::Xz
        } else {
            Self::None
        }
    }
}

/// Ingestion chunker configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Close a chunk once it holds this many rows (0 = unlimited).
    #[serde(default = "default_max_chunk_rows")]
    pub max_chunk_rows: u64,
    /// Close a chunk once its encoded rows reach this many bytes (0 = unlimited).
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: u64,
    /// Codec for chunk payloads.
    #[serde(default)]
    pub compression: CompressionConfig,
    /// Text fields with more distinct values than this keep only min/max.
    #[serde(default = "default_max_value_set")]
    pub max_value_set: usize,
}

fn default_max_chunk_rows() -> u64 {
    DEFAULT_MAX_CHUNK_ROWS
}

fn default_max_chunk_bytes() -> u64 {
    DEFAULT_MAX_CHUNK_BYTES
}

fn default_max_value_set() -> usize {
    64
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_chunk_rows: default_max_chunk_rows(),
            max_chunk_bytes: default_max_chunk_bytes(),
            compression: CompressionConfig::default(),
            max_value_set: default_max_value_set(),
        }
    }
}

impl IngestConfig {
    /// Whether a buffer of `rows` rows and `bytes` encoded bytes must be closed.
    pub fn should_close(&self, rows: u64, bytes: u64) -> bool {
        (self.max_chunk_rows > 0 && rows >= self.max_chunk_rows)
            || (self.max_chunk_bytes > 0 && bytes >= self.max_chunk_bytes)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_value_set == 0 {
            return Err("ingest.max_value_set must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Query executor configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Read candidate chunks and confirm a matching row before reporting them.
    /// When false, answers rely on skip-index statistics alone.
    #[serde(default = "default_verify_candidates")]
    pub verify_candidates: bool,
}

fn default_verify_candidates() -> bool {
    true
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            verify_candidates: default_verify_candidates(),
        }
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Prefer env vars or IAM roles over config files.
        access_key_id: Option<String>,
        /// AWS secret access key. Prefer env vars or IAM roles over config files.
        secret_access_key: Option<String>,
        /// Use `endpoint/bucket/key` addressing (MinIO and most self-hosted services).
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.is_empty() {
                    return Err("s3 config requires a bucket".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// Metadata catalog configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database file.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Longest a statement waits for the catalog connection, in seconds.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(600)
}

impl MetadataConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Sqlite {
                query_timeout_secs: Some(0),
                ..
            } => Err("metadata.query_timeout_secs must be greater than zero".to_string()),
            Self::Sqlite { .. } => Ok(()),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/catalog.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

/// Garbage collection of deleted sequence and topic prefixes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GcConfig {
    /// Run the sweep on a timer in addition to after each delete.
    #[serde(default)]
    pub auto_schedule_enabled: bool,
    /// Interval in seconds between scheduled sweeps (default: 1 hour).
    #[serde(default = "default_gc_interval_secs")]
    pub auto_schedule_interval_secs: u64,
    /// Tombstones processed per sweep.
    #[serde(default = "default_gc_batch_size")]
    pub batch_size: u32,
}

fn default_gc_interval_secs() -> u64 {
    3600
}

fn default_gc_batch_size() -> u32 {
    100
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            auto_schedule_enabled: false,
            auto_schedule_interval_secs: default_gc_interval_secs(),
            batch_size: default_gc_batch_size(),
        }
    }
}

impl GcConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.auto_schedule_interval_secs.max(1))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("gc.batch_size must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Full application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub gc: GcConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses uncompressed payloads so fixtures are readable.
    pub fn for_testing() -> Self {
        Self {
            ingest: IngestConfig {
                compression: CompressionConfig::None,
                ..IngestConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.ingest.validate()?;
        self.storage.validate()?;
        self.metadata.validate()?;
        self.gc.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_close_thresholds() {
        let config = IngestConfig {
            max_chunk_rows: 100,
            max_chunk_bytes: 1024,
            ..IngestConfig::default()
        };
        assert!(!config.should_close(99, 1023));
        assert!(config.should_close(100, 0));
        assert!(config.should_close(1, 1024));
    }

    #[test]
    fn test_zero_threshold_means_unlimited() {
        let config = IngestConfig {
            max_chunk_rows: 0,
            max_chunk_bytes: 0,
            ..IngestConfig::default()
        };
        assert!(!config.should_close(u64::MAX, u64::MAX));
    }

    #[test]
    fn test_partial_sections_take_defaults() {
        let json = r#"{"ingest": {"max_chunk_rows": 10}, "query": {}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.ingest.max_chunk_rows, 10);
        assert_eq!(config.ingest.max_chunk_bytes, DEFAULT_MAX_CHUNK_BYTES);
        assert!(config.query.verify_candidates);
        assert!(config.server.metrics_enabled);
        assert!(matches!(config.metadata, MetadataConfig::Sqlite { .. }));
    }

    #[test]
    fn test_storage_config_tagged() {
        let json = r#"{"type": "s3", "bucket": "rec", "access_key_id": "a"}"#;
        let config: StorageConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_compression_extension_roundtrip() {
        for codec in [
            CompressionConfig::None,
            CompressionConfig::Zstd,
            CompressionConfig::Xz,
        ] {
            let key = format!("chunks/00000000.ndjson{}", codec.extension());
            assert_eq!(CompressionConfig::from_key(&key), codec);
        }
    }

    #[test]
    fn test_validate_rejects_zero_value_set() {
        let mut config = AppConfig::for_testing();
        config.ingest.max_value_set = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_query_timeout() {
        let mut config = AppConfig::for_testing();
        config.metadata = MetadataConfig::Sqlite {
            path: PathBuf::from("catalog.db"),
            query_timeout_secs: Some(0),
        };
        assert!(config.validate().is_err());

        config.metadata = MetadataConfig::Sqlite {
            path: PathBuf::from("catalog.db"),
            query_timeout_secs: None,
        };
        assert!(config.validate().is_ok());
    }
}
