//! Journal command implementations.

use std::path::Path;

use tillsync_local::LocalStore;
use tillsync_protocol::{EntryStatus, JournalEntry};

/// Lists journal entries, newest first.
pub fn list(
    db: &Path,
    status: Option<&str>,
    limit: u64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let status = status.map(parse_status).transpose()?;
    let local = LocalStore::open(db)?;
    let entries = local.recent_entries(status, limit)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("no matching journal entries");
        return Ok(());
    }
    for entry in &entries {
        print_entry(entry);
    }
    Ok(())
}

/// Reopens one entry, or every failed entry, for the next cycle.
pub fn retry(
    db: &Path,
    entry_id: Option<&str>,
    all_failed: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let local = LocalStore::open(db)?;
    match (entry_id, all_failed) {
        (Some(id), false) => {
            let entry = local.retry_entry(id)?;
            println!("entry {} (seq {}) reopened", entry.id, entry.seq);
        }
        (None, true) => {
            let reopened = local.retry_all_failed()?;
            println!("{reopened} failed entries reopened");
        }
        _ => return Err("pass an entry id or --all-failed, not both".into()),
    }
    Ok(())
}

fn parse_status(value: &str) -> Result<EntryStatus, String> {
    EntryStatus::from_str_opt(value).ok_or_else(|| {
        format!("unknown status {value}; expected pending, syncing, synced, conflict, or failed")
    })
}

fn print_entry(entry: &JournalEntry) {
    println!(
        "#{:<5} {}  {:<8} {:<7} {}/{}",
        entry.seq,
        entry.id,
        entry.status.as_str(),
        entry.operation.as_str(),
        entry.table,
        entry.record_id.as_str()
    );
    println!(
        "  created: {}  attempts: {}",
        entry.created_at.to_rfc3339(),
        entry.attempts
    );
    if let Some(error) = &entry.error {
        println!("  error:   {error}");
    }
}
