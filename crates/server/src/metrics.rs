//! Prometheus metrics for the Sextant server.
//!
//! Exposes counters for the sequence lifecycle and ingestion, query latency,
//! and the number of retrieval streams currently open.
//!
//! The `/metrics` endpoint is unauthenticated so that Prometheus can scrape it.
//! Restrict it at the network level when the server is reachable publicly.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Lifecycle metrics
pub static SEQUENCES_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sextant_sequences_created_total",
        "Total number of sequences created",
    )
    .expect("metric creation failed")
});

pub static SEQUENCES_FINALIZED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sextant_sequences_finalized_total",
        "Total number of sequences archived",
    )
    .expect("metric creation failed")
});

pub static SEQUENCES_ABORTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sextant_sequences_aborted_total",
        "Total number of sequences aborted",
    )
    .expect("metric creation failed")
});

// Ingestion metrics
pub static CHUNKS_WRITTEN: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sextant_chunks_written_total",
        "Total number of chunks committed to the catalog",
    )
    .expect("metric creation failed")
});

pub static ROWS_INGESTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sextant_rows_ingested_total",
        "Total number of records accepted into topic buffers",
    )
    .expect("metric creation failed")
});

pub static ROWS_REJECTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sextant_rows_rejected_total",
        "Total number of records rejected by schema validation",
    )
    .expect("metric creation failed")
});

pub static BYTES_WRITTEN: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sextant_bytes_written_total",
        "Total chunk payload bytes written to the object store",
    )
    .expect("metric creation failed")
});

// Query metrics
pub static QUERY_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "sextant_query_duration_seconds",
            "Time taken to execute a query",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0]),
    )
    .expect("metric creation failed")
});

pub static CHUNKS_PRUNED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "sextant_query_chunks_total",
            "Chunks considered by queries, by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

// Retrieval metrics
pub static ACTIVE_STREAMS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "sextant_active_streams",
        "Current number of open retrieval streams",
    )
    .expect("metric creation failed")
});

pub static CHUNK_HASH_MISMATCHES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sextant_chunk_hash_mismatches_total",
        "Total number of chunk payloads failing their integrity check",
    )
    .expect("metric creation failed")
});

// GC metrics
pub static GC_PREFIXES_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sextant_gc_prefixes_deleted_total",
        "Total number of tombstoned prefixes removed by GC",
    )
    .expect("metric creation failed")
});

pub static GC_OBJECTS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "sextant_gc_objects_deleted_total",
        "Total number of objects removed by GC",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Safe to call more than once; only the first call registers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(SEQUENCES_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SEQUENCES_FINALIZED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SEQUENCES_ABORTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNKS_WRITTEN.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ROWS_INGESTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ROWS_REJECTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_WRITTEN.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(QUERY_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNKS_PRUNED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ACTIVE_STREAMS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_HASH_MISMATCHES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(GC_PREFIXES_DELETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(GC_OBJECTS_DELETED.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Holds one slot of the active-stream gauge until dropped.
#[derive(Debug)]
pub struct ActiveStreamGuard(());

impl ActiveStreamGuard {
    pub fn acquire() -> Self {
        ACTIVE_STREAMS.inc();
        Self(())
    }
}

impl Drop for ActiveStreamGuard {
    fn drop(&mut self) {
        ACTIVE_STREAMS.dec();
    }
}
