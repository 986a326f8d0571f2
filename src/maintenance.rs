use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};

pub const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Compact once more than `threshold` events were appended since the last compaction.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appended = engine.wal_appends_since_compact().await;
    if appended <= threshold {
        return Ok(false);
    }
    engine.compact_wal().await?;
    info!(appended, "WAL compacted");
    Ok(true)
}

/// Background task that keeps the WAL from growing without bound.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            warn!(error = %e, "WAL compaction failed");
        }
    }
}

/// Background task that drops cached availability for days already past.
pub async fn run_cache_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let today = chrono::Local::now().date_naive();
        let evicted = engine.sweep_slot_cache(today);
        if evicted > 0 {
            debug!(evicted, "swept availability cache");
        }
    }
}
