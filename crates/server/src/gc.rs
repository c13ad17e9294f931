//! Garbage collection of deleted sequence and topic prefixes.
//!
//! Deletes commit their catalog change together with a tombstone naming the
//! object prefix to remove. The sweep drains tombstones; a tombstone whose
//! prefix could not be removed stays for the next run.

use crate::error::ApiResult;
use crate::lifecycle;
use crate::metrics;
use crate::state::AppState;
use serde::Serialize;
use std::collections::HashSet;
use tokio::task::JoinHandle;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcReport {
    pub prefixes_deleted: u64,
    pub objects_deleted: u64,
    pub failed: u64,
}

/// Remove every tombstoned prefix, one batch at a time.
#[tracing::instrument(skip(state))]
pub async fn sweep(state: &AppState) -> ApiResult<GcReport> {
    let mut report = GcReport::default();
    let mut failed = HashSet::new();

    loop {
        let batch: Vec<_> = state
            .metadata
            .list_tombstones(state.config.gc.batch_size)
            .await?
            .into_iter()
            .filter(|t| !failed.contains(&t.tombstone_id))
            .collect();
        if batch.is_empty() {
            break;
        }

        for tombstone in batch {
            match state.storage.delete_prefix(&tombstone.prefix).await {
                Ok(objects) => {
                    state.metadata.delete_tombstone(tombstone.tombstone_id).await?;
                    report.prefixes_deleted += 1;
                    report.objects_deleted += objects;
                    metrics::GC_PREFIXES_DELETED.inc();
                    metrics::GC_OBJECTS_DELETED.inc_by(objects);
                    tracing::debug!(prefix = %tombstone.prefix, objects, "Prefix collected");
                }
                Err(e) => {
                    tracing::warn!(
                        prefix = %tombstone.prefix,
                        error = %e,
                        "Failed to collect prefix, keeping tombstone"
                    );
                    failed.insert(tombstone.tombstone_id);
                    report.failed += 1;
                }
            }
        }
    }

    if report.prefixes_deleted > 0 || report.failed > 0 {
        tracing::info!(
            prefixes = report.prefixes_deleted,
            objects = report.objects_deleted,
            failed = report.failed,
            "GC sweep finished"
        );
    }
    Ok(report)
}

/// Run one sweep in the background.
pub fn spawn_sweep(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = sweep(&state).await {
            tracing::error!(error = %e, "Background GC sweep failed");
        }
    })
}

/// Sweep on a fixed interval. Sequences left in `Aborted` by an interrupted
/// abort are purged on the same timer.
pub fn spawn_scheduler(state: AppState) -> JoinHandle<()> {
    let interval = state.config.gc.interval();
    tokio::spawn(async move {
        tracing::info!(
            interval_secs = interval.as_secs(),
            "Automatic GC scheduler enabled"
        );
        loop {
            tokio::time::sleep(interval).await;

            match lifecycle::purge_aborted(&state).await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "Purged aborted sequences"),
                Err(e) => tracing::error!(error = %e, "Failed to list aborted sequences"),
            }
            if let Err(e) = sweep(&state).await {
                tracing::error!(error = %e, "Scheduled GC sweep failed");
            }
        }
    })
}
