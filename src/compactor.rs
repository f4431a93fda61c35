use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Rewrite the tenant's WAL once it has grown by `threshold` appends.
/// Returns the number of changes in the new log, or `None` if it was left alone.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> Option<usize> {
    let appends = match engine.appends_since_compact().await {
        Ok(n) => n,
        Err(e) => {
            warn!("compactor cannot read WAL counter: {e}");
            return None;
        }
    };
    if appends < threshold {
        debug!("compactor: {appends} appends, threshold {threshold}");
        return None;
    }
    match engine.compact().await {
        Ok(kept) => {
            info!("compacted WAL: {appends} appends folded into {kept} changes");
            Some(kept)
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            None
        }
    }
}

/// Background task per tenant that keeps the WAL from growing without bound.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}
