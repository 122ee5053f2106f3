//! Status command implementation.

use std::path::Path;

use serde::Serialize;
use tillsync_local::{JournalCounts, LocalStore};

/// Health snapshot assembled from the local store alone.
///
/// Connectivity is a per-process belief, so a CLI invocation cannot report
/// it; everything here is durable state.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Database path.
    pub path: String,
    /// Journal entry counts by status.
    pub journal: JournalCounts,
    /// Open conflicts awaiting an operator.
    pub unresolved_conflicts: usize,
    /// Node id, once the terminal has registered one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Store the terminal belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_id: Option<String>,
    /// Completed sync cycles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_version: Option<u64>,
    /// When the last cycle finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<String>,
}

/// Runs the status command.
pub fn run(db: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let local = LocalStore::open(db)?;
    let journal = local.journal_counts()?;
    let conflicts = local.unresolved_conflicts()?;
    let node = local.load_node()?;

    let report = StatusReport {
        path: db.display().to_string(),
        journal,
        unresolved_conflicts: conflicts.len(),
        node_id: node.as_ref().map(|n| n.id.as_str().to_string()),
        store_id: node.as_ref().map(|n| n.store_id.clone()),
        sync_version: node.as_ref().map(|n| n.sync_version),
        last_sync_at: node
            .as_ref()
            .and_then(|n| n.last_sync_at)
            .map(|at| at.to_rfc3339()),
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text(&report);
        }
    }

    Ok(())
}

fn print_text(report: &StatusReport) {
    println!("till store: {}", report.path);
    println!();
    println!("Journal:");
    println!("  pending:  {}", report.journal.pending);
    println!("  syncing:  {}", report.journal.syncing);
    println!("  synced:   {}", report.journal.synced);
    println!("  conflict: {}", report.journal.conflict);
    println!("  failed:   {}", report.journal.failed);
    println!();
    println!("Open conflicts: {}", report.unresolved_conflicts);

    match (&report.node_id, &report.store_id) {
        (Some(node), Some(store)) => {
            println!();
            println!("Node {node} (store {store})");
            if let Some(version) = report.sync_version {
                println!("  sync cycles: {version}");
            }
            match &report.last_sync_at {
                Some(at) => println!("  last sync:   {at}"),
                None => println!("  last sync:   never"),
            }
        }
        _ => {
            println!();
            println!("Node not registered yet");
        }
    }
}
