use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::{Ledger, LedgerError};

/// Compact the journal if at least `threshold` appends happened since the last
/// compaction. Returns whether it compacted.
pub fn compact_if_due(ledger: &Ledger, threshold: u64) -> Result<bool, LedgerError> {
    let appends = ledger.appends_since_compact();
    if appends < threshold {
        return Ok(false);
    }
    debug!(appends, threshold, "compacting journal");
    ledger.compact()?;
    Ok(true)
}

/// Background task that periodically compacts the journal. Failures are
/// logged and retried on the next tick.
pub async fn run_compactor(ledger: Arc<Ledger>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let ledger = ledger.clone();
        match tokio::task::spawn_blocking(move || compact_if_due(&ledger, threshold)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "compaction failed"),
            Err(e) => warn!(error = %e, "compaction task panicked"),
        }
    }
}
