//! Cleanup command implementation.

use std::path::Path;

use chrono::{Duration, Utc};
use tillsync_local::LocalStore;

/// Deletes synced journal entries older than the retention window.
pub fn run(db: &Path, retention_days: u64) -> Result<(), Box<dyn std::error::Error>> {
    let local = LocalStore::open(db)?;
    let days = i64::try_from(retention_days)?;
    let cutoff = Duration::try_days(days)
        .and_then(|retention| Utc::now().checked_sub_signed(retention))
        .ok_or("retention window too large")?;

    let removed = local.cleanup_synced(cutoff)?;
    println!("{removed} synced entries removed");
    Ok(())
}
