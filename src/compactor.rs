use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::store::BookingStore;

/// Background task that snapshots the WAL whenever enough appends have
/// accumulated. Booking churn (create + cancel) otherwise grows the log
/// without bound.
pub async fn run_compactor(store: Arc<BookingStore>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = store.appends_since_snapshot().await;
        if appends < threshold {
            continue;
        }
        match store.snapshot().await {
            Ok(()) => info!(appends, "WAL snapshot complete"),
            Err(e) => warn!("WAL snapshot failed: {e}"),
        }
    }
}
