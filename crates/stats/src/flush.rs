//! Flat-file flush of the stats map.
//!
//! The file is a JSON object keyed by tenant, written to a temp file and
//! renamed into place so a crash mid-write never leaves a torn cache.

use std::{collections::HashMap, path::Path, time::Duration};

use {
    anyhow::Result,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use crate::{StatsAggregator, TenantStats};

/// Write the current snapshot to `path`.
pub fn flush_to(stats: &StatsAggregator, path: &Path) -> Result<()> {
    let snapshot = stats.snapshot_all();
    let json = serde_json::to_vec_pretty(&snapshot)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    debug!(path = %path.display(), tenants = snapshot.len(), "stats flushed");
    Ok(())
}

/// Load a previously flushed snapshot, if any, into the aggregator.
pub fn load_from(stats: &StatsAggregator, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let raw = std::fs::read(path)?;
    let snapshot: HashMap<String, TenantStats> = serde_json::from_slice(&raw)?;
    stats.restore(snapshot);
    Ok(())
}

/// Periodic flush task. Runs until the token is cancelled; one final flush
/// happens on the way out.
pub async fn run_flush_loop(
    stats: StatsAggregator,
    path: std::path::PathBuf,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = flush_to(&stats, &path) {
                    warn!(error = %e, "stats flush failed");
                }
            }
            _ = cancel.cancelled() => {
                if let Err(e) = flush_to(&stats, &path) {
                    warn!(error = %e, "final stats flush failed");
                }
                break;
            }
        }
    }
}
