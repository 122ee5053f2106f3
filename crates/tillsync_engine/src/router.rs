//! Operation routing between the remote and local stores.
//!
//! Connectivity is sampled once at the start of each operation into a
//! [`StoreRoute`]; the sampled route decides the store for that whole
//! operation. Online operations go remote-first and mirror results into the
//! local cache best-effort. Offline writes are admitted by the table's write
//! policy and land as a row change plus journal entry in one local
//! transaction.

use serde_json::Value;
use tracing::{debug, warn};

use tillsync_model::{
    row_record_id, FeatureFlags, FieldMap, Mutation, MutationKind, Query, RecordId, TableAccess,
};
use tillsync_protocol::JournalEntry;

use crate::engine::SyncEngine;
use crate::error::{EngineError, EngineResult};
use crate::remote::RemoteStore;

/// The store an operation was routed to when connectivity was sampled.
///
/// Every routed operation matches on both variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreRoute {
    /// Connectivity read online; go to the authoritative store.
    Remote,
    /// Connectivity read offline; serve and journal locally.
    Local,
}

/// Checks whether the table's policy admits a journaled offline write.
pub(crate) fn check_offline_write(
    table: &str,
    access: &TableAccess,
    flags: &FeatureFlags,
) -> EngineResult<()> {
    match access {
        TableAccess::OfflineCapable => Ok(()),
        TableAccess::RemoteOnly => Err(EngineError::ReadOnlyOffline {
            table: table.to_string(),
        }),
        TableAccess::Gated { feature } if flags.is_enabled(feature) => Ok(()),
        TableAccess::Gated { feature } => Err(EngineError::FeatureDisabledOffline {
            table: table.to_string(),
            feature: feature.clone(),
        }),
    }
}

impl<R: RemoteStore> SyncEngine<R> {
    /// Samples connectivity into the route for one operation.
    fn route(&self) -> StoreRoute {
        if self.connectivity.is_online() {
            StoreRoute::Remote
        } else {
            StoreRoute::Local
        }
    }

    /// Reads rows from the authoritative store, falling back to the local
    /// cache when offline or when the remote cannot be reached.
    pub fn select(&self, table: &str, query: &Query) -> EngineResult<Vec<FieldMap>> {
        match self.route() {
            StoreRoute::Remote => match self.remote.select(table, query) {
                Ok(rows) => {
                    self.mirror_rows(table, &rows);
                    Ok(rows)
                }
                Err(err) if err.is_transport() => {
                    warn!(table, error = %err, "remote read failed, serving cached rows");
                    self.connectivity.set_online(false);
                    Ok(self.local.select(table, query)?)
                }
                Err(err) => Err(err),
            },
            StoreRoute::Local => Ok(self.local.select(table, query)?),
        }
    }

    /// Reads one row by record id, routed like [`SyncEngine::select`].
    pub fn select_one(&self, table: &str, id: &RecordId) -> EngineResult<Option<FieldMap>> {
        match self.route() {
            StoreRoute::Remote => match self.remote.select_one(table, id) {
                Ok(row) => {
                    if let Some(row) = row.as_ref() {
                        self.mirror_rows(table, std::slice::from_ref(row));
                    }
                    Ok(row)
                }
                Err(err) if err.is_transport() => {
                    warn!(table, error = %err, "remote read failed, serving cached row");
                    self.connectivity.set_online(false);
                    Ok(self.local.select_one(table, id)?)
                }
                Err(err) => Err(err),
            },
            StoreRoute::Local => Ok(self.local.select_one(table, id)?),
        }
    }

    /// Applies a single mutation.
    ///
    /// Online, the write goes to the remote store and the result is mirrored
    /// into the cache. Offline (or when the remote write fails in transport
    /// and the table is offline-capable), the write lands locally together
    /// with a journal entry for later replay. Returns the resulting row, or
    /// the pre-delete snapshot for deletes.
    pub fn mutate(&self, mutation: Mutation) -> EngineResult<FieldMap> {
        let access = self.config.write_policy.access(&mutation.table)?;
        let target = match (&mutation.kind, &mutation.id) {
            (MutationKind::Insert, None) => RecordId::generate(),
            (_, Some(id)) => id.clone(),
            (_, None) => {
                return Err(EngineError::MissingRecordId {
                    table: mutation.table,
                })
            }
        };

        match self.route() {
            StoreRoute::Remote => match self.remote_apply(&mutation, &target) {
                Ok(row) => {
                    self.mirror_mutation(&mutation, &target, &row);
                    return Ok(row);
                }
                Err(err) if err.is_transport() => {
                    warn!(table = %mutation.table, error = %err, "remote write failed in transport");
                    self.connectivity.set_online(false);
                    // Route around the outage only where policy admits an
                    // offline write; otherwise the transport failure stands.
                    check_offline_write(&mutation.table, access, &self.config.feature_flags)
                        .map_err(|_| err)?;
                    debug!(table = %mutation.table, "falling back to journaled local write");
                }
                Err(err) => return Err(err),
            },
            StoreRoute::Local => {
                check_offline_write(&mutation.table, access, &self.config.feature_flags)?;
            }
        }

        self.journal_write(&mutation, &target)
    }

    fn remote_apply(&self, mutation: &Mutation, target: &RecordId) -> EngineResult<FieldMap> {
        match mutation.kind {
            MutationKind::Insert => {
                let mut payload = mutation.payload.clone();
                payload.insert(
                    "id".to_string(),
                    Value::String(target.as_str().to_string()),
                );
                self.remote.insert(&mutation.table, &payload)
            }
            MutationKind::Update => self.remote.update(&mutation.table, target, &mutation.payload),
            MutationKind::Delete => self
                .remote
                .delete(&mutation.table, target)?
                .ok_or_else(|| EngineError::NotFound {
                    table: mutation.table.clone(),
                    record_id: target.as_str().to_string(),
                }),
        }
    }

    /// Lands an offline write: row change plus journal entry, one commit.
    fn journal_write(&self, mutation: &Mutation, target: &RecordId) -> EngineResult<FieldMap> {
        let origin = self.node.read().id.clone();
        let (row, entry) = self.local.transaction(|txn| {
            let seq = txn.next_seq()?;
            let (row, journal_payload) = match mutation.kind {
                MutationKind::Insert => {
                    let row = txn.insert(&mutation.table, target, mutation.payload.clone())?;
                    (row.clone(), row)
                }
                MutationKind::Update => {
                    let row = txn.update(&mutation.table, target, &mutation.payload)?;
                    (row, mutation.payload.clone())
                }
                MutationKind::Delete => {
                    let snapshot = txn.delete(&mutation.table, target)?;
                    (snapshot.clone(), snapshot)
                }
            };
            let entry = JournalEntry::new(
                seq,
                mutation.kind,
                &mutation.table,
                target.clone(),
                journal_payload,
                origin.clone(),
            );
            txn.append_journal(&entry)?;
            Ok((row, entry))
        })?;
        debug!(
            table = %mutation.table,
            record = %target.as_str(),
            seq = entry.seq,
            operation = entry.operation.as_str(),
            "journaled offline write"
        );
        Ok(row)
    }

    /// Best-effort mirror of remote rows into the local cache.
    pub(crate) fn mirror_rows(&self, table: &str, rows: &[FieldMap]) {
        for row in rows {
            let Some(id) = row_record_id(row) else {
                continue;
            };
            if let Err(err) = self.local.upsert(table, &id, row.clone()) {
                warn!(table, error = %err, "failed to mirror row into cache");
                break;
            }
        }
    }

    /// Best-effort mirror of an online write's outcome into the cache.
    fn mirror_mutation(&self, mutation: &Mutation, target: &RecordId, row: &FieldMap) {
        let outcome = match mutation.kind {
            MutationKind::Delete => self.local.remove(&mutation.table, target).map(|_| ()),
            _ => self
                .local
                .upsert(&mutation.table, target, row.clone())
                .map(|_| ()),
        };
        if let Err(err) = outcome {
            warn!(table = %mutation.table, error = %err, "failed to mirror write into cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(enabled: &[&str]) -> FeatureFlags {
        enabled
            .iter()
            .fold(FeatureFlags::new(), |flags, feature| flags.enable(*feature))
    }

    #[test]
    fn offline_capable_tables_admit_offline_writes() {
        assert!(check_offline_write("orders", &TableAccess::OfflineCapable, &flags(&[])).is_ok());
    }

    #[test]
    fn remote_only_tables_deny_offline_writes() {
        let err =
            check_offline_write("products", &TableAccess::RemoteOnly, &flags(&[])).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ReadOnlyOffline { table } if table == "products"
        ));
    }

    #[test]
    fn gated_tables_follow_their_feature_flag() {
        let gated = TableAccess::Gated {
            feature: "offline_refunds".into(),
        };
        assert!(check_offline_write("refunds", &gated, &flags(&["offline_refunds"])).is_ok());

        let err = check_offline_write("refunds", &gated, &flags(&[])).unwrap_err();
        assert!(matches!(
            err,
            EngineError::FeatureDisabledOffline { feature, .. } if feature == "offline_refunds"
        ));
    }
}
