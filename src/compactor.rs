use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::store::Store;

const TICK: Duration = Duration::from_secs(5);

/// Background housekeeping: compacts the WAL once it has grown past
/// `threshold` appends, and drops idle lock and notification entries.
pub async fn run_compactor(store: Arc<Store>, threshold: u64) {
    let mut interval = tokio::time::interval(TICK);
    loop {
        interval.tick().await;
        compact_once(&store, threshold).await;
    }
}

/// One housekeeping pass. Returns true if the WAL was rewritten.
pub async fn compact_once(store: &Store, threshold: u64) -> bool {
    store.prune_locks();
    store.notify.prune();

    let appends = store.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match store.compact_wal().await {
        Ok(()) => {
            info!(appends, "compacted WAL");
            true
        }
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            false
        }
    }
}
