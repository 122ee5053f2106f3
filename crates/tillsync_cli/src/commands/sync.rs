//! Sync command implementation.

use std::path::Path;
use std::time::Duration;

use tracing::info;

use tillsync_engine::{ApplyMode, SyncReport};

use crate::client::open_engine;

/// Runs one replay cycle and prints its counters.
///
/// Exits with an error when the cycle stopped on a transport failure, so
/// cron jobs and scripts see an unreachable remote as a nonzero status.
pub fn run(
    db: &Path,
    remote_url: &str,
    token: Option<&str>,
    store_id: Option<&str>,
    deadline_secs: Option<u64>,
    max_entries: Option<usize>,
    batch: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_engine(db, remote_url, token, store_id, |mut config| {
        if let Some(secs) = deadline_secs {
            config = config.with_cycle_deadline(Duration::from_secs(secs));
        }
        if let Some(max) = max_entries {
            config = config.with_max_entries_per_cycle(max);
        }
        if batch {
            config = config.with_apply_mode(ApplyMode::Batch);
        }
        config
    })?;

    info!(remote = remote_url, "replaying journal against remote store");
    let report = engine.trigger_sync()?;
    print_report(&report);

    if !engine.is_online() {
        return Err("remote store unreachable; entries remain queued".into());
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    println!("attempted:     {}", report.attempted);
    println!("synced:        {}", report.synced);
    println!("failed:        {}", report.failed);
    println!("conflicts:     {}", report.conflicts);
    println!("auto-resolved: {}", report.auto_resolved);
    println!("skipped:       {}", report.skipped);
    if report.stopped_early {
        println!("stopped early after {:.1?}", report.duration);
    } else {
        println!("completed in {:.1?}", report.duration);
    }
}
