//! Conflict resolution.
//!
//! Resolving a conflict settles one journal entry for good: the chosen side
//! is pushed to the remote store first, then the conflict record, the entry
//! status, and the cache adopt the outcome in a single local transaction.
//! A resolution that fails remotely leaves the conflict open and untouched.

use serde_json::Value;
use tracing::info;

use tillsync_model::{FieldMap, MutationKind, RecordId};
use tillsync_protocol::{JournalEntry, Resolution, SyncConflict};

use crate::engine::SyncEngine;
use crate::error::{EngineError, EngineResult};
use crate::remote::RemoteStore;

impl<R: RemoteStore> SyncEngine<R> {
    /// Resolves an open conflict.
    ///
    /// `merged` supplies the payload for [`Resolution::Merged`]; when omitted
    /// the engine merges via the configured per-table rules, and errors if
    /// the table has none. `resolved_by` is recorded for audit.
    pub fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: Resolution,
        merged: Option<FieldMap>,
        resolved_by: &str,
    ) -> EngineResult<SyncConflict> {
        let conflict = self.local.conflict(conflict_id)?.ok_or_else(|| {
            EngineError::ConflictNotFound {
                conflict_id: conflict_id.to_string(),
            }
        })?;
        if conflict.is_resolved() {
            return Err(EngineError::AlreadyResolved {
                conflict_id: conflict_id.to_string(),
            });
        }
        let entry = self
            .local
            .journal_entry(&conflict.journal_entry_id)?
            .ok_or_else(|| EngineError::ConflictNotFound {
                conflict_id: conflict_id.to_string(),
            })?;

        let merged_payload = match resolution {
            Resolution::Merged => Some(self.merged_payload(&conflict, merged)?),
            _ => None,
        };
        self.apply_resolution(conflict, &entry, resolution, merged_payload, resolved_by)
    }

    /// Resolves a just-recorded conflict per the automatic policy.
    pub(crate) fn auto_resolve(
        &self,
        conflict: &SyncConflict,
        entry: &JournalEntry,
        resolution: Resolution,
    ) -> EngineResult<()> {
        let merged = match resolution {
            Resolution::Merged => Some(self.merged_payload(conflict, None)?),
            _ => None,
        };
        self.apply_resolution(conflict.clone(), entry, resolution, merged, "policy")?;
        Ok(())
    }

    /// Produces the merged payload: the caller's, or one computed from the
    /// per-table rules when both sides are present.
    fn merged_payload(
        &self,
        conflict: &SyncConflict,
        provided: Option<FieldMap>,
    ) -> EngineResult<FieldMap> {
        if let Some(payload) = provided {
            return Ok(payload);
        }
        let Some(remote) = conflict.remote_snapshot.as_ref() else {
            // A delete conflict has no remote side to merge with.
            return Err(EngineError::MergedPayloadRequired {
                conflict_id: conflict.id.clone(),
            });
        };
        if !self.config.merge_policy.covers(&conflict.table) {
            return Err(EngineError::MergedPayloadRequired {
                conflict_id: conflict.id.clone(),
            });
        }
        Ok(self
            .config
            .merge_policy
            .merge(&conflict.table, &conflict.local_snapshot, remote)?)
    }

    /// Pushes the chosen outcome to the remote store, then commits the
    /// resolution, the entry's terminal status, and the cache update locally.
    fn apply_resolution(
        &self,
        mut conflict: SyncConflict,
        entry: &JournalEntry,
        resolution: Resolution,
        merged: Option<FieldMap>,
        resolved_by: &str,
    ) -> EngineResult<SyncConflict> {
        let adopted: Option<FieldMap> = match resolution {
            Resolution::RemoteWins => conflict.remote_snapshot.clone(),
            Resolution::LocalWins => self.force_local_outcome(&conflict, entry)?,
            Resolution::Merged => {
                let payload = merged.clone().ok_or_else(|| {
                    EngineError::MergedPayloadRequired {
                        conflict_id: conflict.id.clone(),
                    }
                })?;
                Some(self.force_remote_put(&conflict.table, &conflict.record_id, &payload)?)
            }
        };

        conflict.mark_resolved(resolution, merged, resolved_by);
        let updated = self.local.transaction(|txn| {
            let updated = txn.store_resolution(&conflict)?;
            if updated {
                txn.mark_synced(&entry.id)?;
                match adopted.clone() {
                    Some(row) => {
                        txn.upsert(&conflict.table, &conflict.record_id, row)?;
                    }
                    None => {
                        txn.remove(&conflict.table, &conflict.record_id)?;
                    }
                }
            }
            Ok(updated)
        })?;
        if !updated {
            return Err(EngineError::AlreadyResolved {
                conflict_id: conflict.id,
            });
        }

        info!(
            conflict = %conflict.id,
            resolution = resolution.as_str(),
            resolved_by,
            table = %conflict.table,
            record = %conflict.record_id.as_str(),
            "conflict resolved"
        );
        Ok(conflict)
    }

    /// Forces the local side onto the remote store.
    ///
    /// Returns the row the cache should adopt, or `None` when the outcome is
    /// an absent row.
    fn force_local_outcome(
        &self,
        conflict: &SyncConflict,
        entry: &JournalEntry,
    ) -> EngineResult<Option<FieldMap>> {
        match entry.operation {
            MutationKind::Delete => {
                self.remote.delete(&conflict.table, &conflict.record_id)?;
                Ok(None)
            }
            MutationKind::Insert | MutationKind::Update => {
                // The cached row is the full local state; the entry payload
                // alone can be a partial patch.
                let payload = match self.local.select_one(&conflict.table, &conflict.record_id)? {
                    Some(cached) => cached,
                    None => conflict.local_snapshot.clone(),
                };
                let row = self.force_remote_put(&conflict.table, &conflict.record_id, &payload)?;
                Ok(Some(row))
            }
        }
    }

    /// Writes a full payload to the remote row, creating it if it vanished.
    fn force_remote_put(
        &self,
        table: &str,
        id: &RecordId,
        payload: &FieldMap,
    ) -> EngineResult<FieldMap> {
        match self.remote.update(table, id, payload) {
            Err(EngineError::NotFound { .. }) => {
                let mut full = payload.clone();
                full.insert("id".to_string(), Value::String(id.as_str().to_string()));
                self.remote.insert(table, &full)
            }
            other => other,
        }
    }
}
