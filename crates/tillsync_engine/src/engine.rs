//! The dual-store engine.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::info;

use tillsync_local::{JournalCounts, LocalStore};
use tillsync_model::EdgeNode;
use tillsync_protocol::{JournalEntry, SyncConflict};

use crate::config::EngineConfig;
use crate::connectivity::Connectivity;
use crate::error::EngineResult;
use crate::remote::RemoteStore;

/// A point-in-time view of engine health for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    /// The engine's current connectivity belief.
    pub online: bool,
    /// Journal entry counts by status.
    pub journal: JournalCounts,
    /// Open conflicts awaiting an operator.
    pub unresolved_conflicts: u64,
    /// This terminal's identity and sync bookkeeping.
    pub node: EdgeNode,
}

/// Routes reads and writes between the authoritative remote store and the
/// embedded local store, journaling offline writes for later replay.
///
/// The engine is `Sync`; all interior state is behind locks or atomics, so
/// one instance can serve every thread of a terminal process.
pub struct SyncEngine<R> {
    pub(crate) config: EngineConfig,
    pub(crate) remote: R,
    pub(crate) local: LocalStore,
    pub(crate) connectivity: Connectivity,
    pub(crate) replay_gate: Mutex<()>,
    pub(crate) node: RwLock<EdgeNode>,
}

impl<R: RemoteStore> SyncEngine<R> {
    /// Creates an engine over an opened local store.
    ///
    /// Startup recovery runs here: entries a crash left in `syncing` go back
    /// to `pending`, and the terminal's node record is loaded (or created on
    /// first launch and persisted).
    pub fn new(config: EngineConfig, remote: R, local: LocalStore) -> EngineResult<Self> {
        let recovered = local.reset_interrupted()?;
        if recovered > 0 {
            info!(recovered, "returned interrupted journal entries to pending");
        }

        let node = match local.load_node()? {
            Some(node) => node,
            None => {
                let node = EdgeNode::new(&config.store_id);
                local.save_node(&node)?;
                info!(node = %node.id.as_str(), "registered new edge node");
                node
            }
        };

        Ok(Self {
            config,
            remote,
            local,
            connectivity: Connectivity::new(true),
            replay_gate: Mutex::new(()),
            node: RwLock::new(node),
        })
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The embedded local store.
    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// This terminal's node record.
    pub fn node(&self) -> EdgeNode {
        self.node.read().clone()
    }

    /// The current connectivity belief.
    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Records a connectivity change reported by the application.
    pub fn set_online(&self, online: bool) {
        self.connectivity.set_online(online);
    }

    /// Reports journal and conflict health.
    pub fn sync_status(&self) -> EngineResult<SyncStatus> {
        let journal = self.local.journal_counts()?;
        let unresolved_conflicts = self.local.unresolved_conflicts()?.len() as u64;
        Ok(SyncStatus {
            online: self.is_online(),
            journal,
            unresolved_conflicts,
            node: self.node(),
        })
    }

    /// Open conflicts, oldest first.
    pub fn list_conflicts(&self) -> EngineResult<Vec<SyncConflict>> {
        Ok(self.local.unresolved_conflicts()?)
    }

    /// Returns one failed or conflicted entry to `pending` for the next
    /// replay cycle.
    pub fn retry_entry(&self, entry_id: &str) -> EngineResult<JournalEntry> {
        Ok(self.local.retry_entry(entry_id)?)
    }

    /// Returns every failed entry to `pending`, reporting how many moved.
    pub fn retry_failed(&self) -> EngineResult<usize> {
        Ok(self.local.retry_all_failed()?)
    }

    /// Deletes synced journal entries older than the configured retention.
    pub fn cleanup_synced(&self) -> EngineResult<usize> {
        let cutoff = chrono::Duration::from_std(self.config.synced_retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Ok(self.local.cleanup_synced(cutoff)?)
    }
}
