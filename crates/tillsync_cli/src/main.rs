//! tillsync CLI
//!
//! Command-line tools for a till terminal's local store and sync state.
//!
//! # Commands
//!
//! - `status` - Show journal, conflict, and node health
//! - `sync` - Run one replay cycle against the remote store
//! - `conflicts` - List and resolve replay conflicts
//! - `journal` - List journal entries, newest first
//! - `retry` - Reopen failed or conflicted entries for the next cycle
//! - `cleanup` - Prune synced journal entries past retention
//! - `node` - Show this terminal's node record

mod client;
mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// tillsync terminal-side store tools.
#[derive(Parser)]
#[command(name = "tillsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the local till database file
    #[arg(global = true, long)]
    db: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show journal, conflict, and node health
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run one replay cycle against the remote store
    Sync {
        /// Base URL of the remote store
        #[arg(long)]
        remote_url: String,

        /// Bearer token presented to the remote store
        #[arg(long)]
        token: Option<String>,

        /// Store id; defaults to the one in the node record
        #[arg(long)]
        store_id: Option<String>,

        /// Wall-clock budget for the cycle, in seconds
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Cap on entries attempted this cycle
        #[arg(long)]
        max_entries: Option<usize>,

        /// Ship entries in batches instead of one request each
        #[arg(long)]
        batch: bool,
    },

    /// List and resolve replay conflicts
    Conflicts {
        #[command(subcommand)]
        action: ConflictAction,
    },

    /// List journal entries, newest first
    Journal {
        /// Filter by status (pending, syncing, synced, conflict, failed)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum entries to show
        #[arg(short, long, default_value = "20")]
        limit: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Reopen failed or conflicted entries for the next cycle
    Retry {
        /// Entry id to reopen
        entry_id: Option<String>,

        /// Reopen every failed entry instead
        #[arg(long)]
        all_failed: bool,
    },

    /// Prune synced journal entries past retention
    Cleanup {
        /// Retention window in days
        #[arg(long, default_value = "7")]
        retention_days: u64,
    },

    /// Show this terminal's node record
    Node {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
enum ConflictAction {
    /// List open conflicts, oldest first
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Resolve one conflict and settle its journal entry
    Resolve {
        /// Conflict id
        conflict_id: String,

        /// Resolution to apply (local-wins, remote-wins, merged)
        #[arg(long)]
        resolution: String,

        /// Merged payload as a JSON object, for tables without merge rules
        #[arg(long)]
        payload: Option<String>,

        /// Operator recorded on the resolution
        #[arg(long, default_value = "cli")]
        resolved_by: String,

        /// Base URL of the remote store
        #[arg(long)]
        remote_url: String,

        /// Bearer token presented to the remote store
        #[arg(long)]
        token: Option<String>,

        /// Store id; defaults to the one in the node record
        #[arg(long)]
        store_id: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let db = cli.db.ok_or("database path required; pass --db <file>")?;

    match cli.command {
        Commands::Status { format } => {
            commands::status::run(&db, &format)?;
        }
        Commands::Sync {
            remote_url,
            token,
            store_id,
            deadline_secs,
            max_entries,
            batch,
        } => {
            commands::sync::run(
                &db,
                &remote_url,
                token.as_deref(),
                store_id.as_deref(),
                deadline_secs,
                max_entries,
                batch,
            )?;
        }
        Commands::Conflicts { action } => match action {
            ConflictAction::List { format } => {
                commands::conflicts::list(&db, &format)?;
            }
            ConflictAction::Resolve {
                conflict_id,
                resolution,
                payload,
                resolved_by,
                remote_url,
                token,
                store_id,
            } => {
                commands::conflicts::resolve(
                    &db,
                    &conflict_id,
                    &resolution,
                    payload.as_deref(),
                    &resolved_by,
                    &remote_url,
                    token.as_deref(),
                    store_id.as_deref(),
                )?;
            }
        },
        Commands::Journal {
            status,
            limit,
            format,
        } => {
            commands::journal::list(&db, status.as_deref(), limit, &format)?;
        }
        Commands::Retry {
            entry_id,
            all_failed,
        } => {
            commands::journal::retry(&db, entry_id.as_deref(), all_failed)?;
        }
        Commands::Cleanup { retention_days } => {
            commands::cleanup::run(&db, retention_days)?;
        }
        Commands::Node { format } => {
            commands::node::run(&db, &format)?;
        }
    }

    Ok(())
}
