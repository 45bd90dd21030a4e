//! Stale-lock reaper: crash recovery for jobs whose dispatcher died while
//! holding the lock. Runs only when explicitly requested with a threshold.

use tracing::{info, warn};

use crate::{error::Result, store::JobStore};

/// Release every job locked for longer than `threshold_secs`.
///
/// Idempotent: a second call with no stale rows changes nothing.
pub fn reap_stale_locks(store: &dyn JobStore, threshold_secs: u64) -> Result<usize> {
    let released = store.unlock_stale(threshold_secs)?;
    if released > 0 {
        warn!(count = released, threshold_secs, "released stale job locks");
    } else {
        info!(threshold_secs, "no stale job locks");
    }
    Ok(released)
}
