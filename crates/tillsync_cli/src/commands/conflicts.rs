//! Conflicts command implementations.

use std::path::Path;

use tillsync_local::LocalStore;
use tillsync_model::FieldMap;
use tillsync_protocol::{Resolution, SyncConflict};

use crate::client::open_engine;

/// Lists open conflicts, oldest first.
pub fn list(db: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let local = LocalStore::open(db)?;
    let conflicts = local.unresolved_conflicts()?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
        return Ok(());
    }
    if conflicts.is_empty() {
        println!("no open conflicts");
        return Ok(());
    }
    for conflict in &conflicts {
        print_conflict(conflict);
    }
    Ok(())
}

/// Resolves one conflict against the remote store.
#[allow(clippy::too_many_arguments)]
pub fn resolve(
    db: &Path,
    conflict_id: &str,
    resolution: &str,
    payload: Option<&str>,
    resolved_by: &str,
    remote_url: &str,
    token: Option<&str>,
    store_id: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let resolution = parse_resolution(resolution)?;
    let merged: Option<FieldMap> = payload
        .map(serde_json::from_str)
        .transpose()
        .map_err(|err| format!("merged payload is not a JSON object: {err}"))?;

    let engine = open_engine(db, remote_url, token, store_id, |config| config)?;
    let resolved = engine.resolve_conflict(conflict_id, resolution, merged, resolved_by)?;

    println!(
        "conflict {} on {}/{} resolved ({})",
        resolved.id,
        resolved.table,
        resolved.record_id.as_str(),
        resolution.as_str(),
    );
    Ok(())
}

fn parse_resolution(value: &str) -> Result<Resolution, String> {
    match value {
        "local-wins" => Ok(Resolution::LocalWins),
        "remote-wins" => Ok(Resolution::RemoteWins),
        "merged" => Ok(Resolution::Merged),
        other => Err(format!(
            "unknown resolution {other}; expected local-wins, remote-wins, or merged"
        )),
    }
}

fn print_conflict(conflict: &SyncConflict) {
    println!(
        "{}  {}  {}/{}",
        conflict.id,
        conflict.kind,
        conflict.table,
        conflict.record_id.as_str()
    );
    println!("  detected: {}", conflict.detected_at.to_rfc3339());
    println!(
        "  local:    {}",
        serde_json::to_string(&conflict.local_snapshot).unwrap_or_default()
    );
    match &conflict.remote_snapshot {
        Some(remote) => println!(
            "  remote:   {}",
            serde_json::to_string(remote).unwrap_or_default()
        ),
        None => println!("  remote:   (row absent)"),
    }
}
