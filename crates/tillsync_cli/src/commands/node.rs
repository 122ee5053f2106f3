//! Node command implementation.

use std::path::Path;

use tillsync_local::LocalStore;

/// Prints this terminal's node record.
pub fn run(db: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let local = LocalStore::open(db)?;
    let Some(node) = local.load_node()? else {
        println!("node not registered yet; the first engine start creates it");
        return Ok(());
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&node)?);
        return Ok(());
    }
    println!("node:        {}", node.id.as_str());
    println!("store:       {}", node.store_id);
    println!("status:      {}", node.status.as_str());
    println!("sync cycles: {}", node.sync_version);
    match node.last_sync_at {
        Some(at) => println!("last sync:   {}", at.to_rfc3339()),
        None => println!("last sync:   never"),
    }
    Ok(())
}
