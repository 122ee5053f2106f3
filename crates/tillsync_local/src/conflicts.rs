//! Conflict record persistence.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use tillsync_model::RecordId;
use tillsync_protocol::{ConflictKind, Resolution, SyncConflict};

use crate::error::{LocalError, LocalResult};
use crate::sql::{decode_ts, encode_ts};

const CONFLICT_COLUMNS: &str = "id, journal_entry_id, kind, table_name, record_id, \
                                local_snapshot, remote_snapshot, detected_at, resolution, \
                                resolved_payload, resolved_by, resolved_at";

fn decode_conflict(row: &Row<'_>) -> LocalResult<SyncConflict> {
    let kind: String = row.get(2)?;
    let local_snapshot: String = row.get(5)?;
    let remote_snapshot: Option<String> = row.get(6)?;
    let detected_at: String = row.get(7)?;
    let resolution: Option<String> = row.get(8)?;
    let resolved_payload: Option<String> = row.get(9)?;
    let resolved_at: Option<String> = row.get(11)?;

    Ok(SyncConflict {
        id: row.get(0)?,
        journal_entry_id: row.get(1)?,
        kind: ConflictKind::from_str_opt(&kind)
            .ok_or_else(|| LocalError::decode(format!("unknown conflict kind: {kind}")))?,
        table: row.get(3)?,
        record_id: RecordId::from_trusted(row.get::<_, String>(4)?),
        local_snapshot: serde_json::from_str(&local_snapshot)?,
        remote_snapshot: remote_snapshot
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        detected_at: decode_ts(&detected_at)?,
        resolution: resolution
            .as_deref()
            .map(|r| {
                Resolution::from_str_opt(r)
                    .ok_or_else(|| LocalError::decode(format!("unknown resolution: {r}")))
            })
            .transpose()?,
        resolved_payload: resolved_payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        resolved_by: row.get(10)?,
        resolved_at: resolved_at.as_deref().map(decode_ts).transpose()?,
    })
}

/// Records a freshly detected conflict.
///
/// Re-detection refreshes the existing unresolved conflict row for the same
/// journal entry (a retried entry that conflicts again must not pile up
/// duplicate conflicts). Returns the conflict as stored, id included.
pub(crate) fn record(conn: &Connection, conflict: &SyncConflict) -> LocalResult<SyncConflict> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM sync_conflicts
             WHERE journal_entry_id = ?1 AND resolution IS NULL",
            params![conflict.journal_entry_id],
            |row| row.get(0),
        )
        .optional()?;

    let local_snapshot = serde_json::to_string(&conflict.local_snapshot)?;
    let remote_snapshot = conflict
        .remote_snapshot
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE sync_conflicts
                 SET kind = ?2, local_snapshot = ?3, remote_snapshot = ?4, detected_at = ?5
                 WHERE id = ?1",
                params![
                    id,
                    conflict.kind.as_str(),
                    local_snapshot,
                    remote_snapshot,
                    encode_ts(conflict.detected_at),
                ],
            )?;
            let mut stored = conflict.clone();
            stored.id = id;
            Ok(stored)
        }
        None => {
            conn.execute(
                "INSERT INTO sync_conflicts
                     (id, journal_entry_id, kind, table_name, record_id,
                      local_snapshot, remote_snapshot, detected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    conflict.id,
                    conflict.journal_entry_id,
                    conflict.kind.as_str(),
                    conflict.table,
                    conflict.record_id.as_str(),
                    local_snapshot,
                    remote_snapshot,
                    encode_ts(conflict.detected_at),
                ],
            )?;
            Ok(conflict.clone())
        }
    }
}

pub(crate) fn get(conn: &Connection, id: &str) -> LocalResult<Option<SyncConflict>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts WHERE id = ?1"
    ))?;
    let mut rows = stmt.query_and_then(params![id], |row| decode_conflict(row))?;
    rows.next().transpose()
}

/// Unresolved conflicts, oldest first.
pub(crate) fn list_unresolved(conn: &Connection) -> LocalResult<Vec<SyncConflict>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
         WHERE resolution IS NULL ORDER BY detected_at ASC"
    ))?;
    let rows = stmt.query_and_then([], |row| decode_conflict(row))?;
    rows.collect()
}

/// Persists a resolution.
///
/// Guarded on `resolution IS NULL`: resolving is terminal, so the first
/// resolution wins and a second attempt reports `false`.
pub(crate) fn mark_resolved(conn: &Connection, conflict: &SyncConflict) -> LocalResult<bool> {
    let resolution = conflict
        .resolution
        .ok_or_else(|| LocalError::decode("resolution missing on resolved conflict"))?;
    let resolved_payload = conflict
        .resolved_payload
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let changed = conn.execute(
        "UPDATE sync_conflicts
         SET resolution = ?2, resolved_payload = ?3, resolved_by = ?4, resolved_at = ?5
         WHERE id = ?1 AND resolution IS NULL",
        params![
            conflict.id,
            resolution.as_str(),
            resolved_payload,
            conflict.resolved_by,
            conflict.resolved_at.map(encode_ts),
        ],
    )?;
    Ok(changed == 1)
}

/// Resolves any open conflict recorded for a journal entry.
///
/// Covers the retry path: an entry that conflicted earlier can go back to
/// pending and then apply cleanly, which supersedes its recorded conflict.
pub(crate) fn resolve_for_entry(
    conn: &Connection,
    journal_entry_id: &str,
    resolution: Resolution,
    resolved_by: &str,
    resolved_at: DateTime<Utc>,
) -> LocalResult<bool> {
    let changed = conn.execute(
        "UPDATE sync_conflicts
         SET resolution = ?2, resolved_by = ?3, resolved_at = ?4
         WHERE journal_entry_id = ?1 AND resolution IS NULL",
        params![
            journal_entry_id,
            resolution.as_str(),
            resolved_by,
            encode_ts(resolved_at),
        ],
    )?;
    Ok(changed > 0)
}

/// True when an unresolved conflict exists for the record, optionally
/// ignoring conflicts belonging to one journal entry.
///
/// Replay uses this to hold back later entries for a record whose earlier
/// entry is stuck in conflict.
pub(crate) fn has_unresolved_for_record(
    conn: &Connection,
    table: &str,
    record_id: &RecordId,
    exclude_entry: Option<&str>,
) -> LocalResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sync_conflicts
         WHERE table_name = ?1 AND record_id = ?2 AND resolution IS NULL
           AND (?3 IS NULL OR journal_entry_id != ?3)",
        params![table, record_id.as_str(), exclude_entry],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tillsync_model::{FieldMap, MutationKind, NodeId};
    use tillsync_protocol::JournalEntry;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::schema::init(&conn).unwrap();
        conn
    }

    fn seeded_entry(conn: &Connection, seq: u64) -> JournalEntry {
        let entry = JournalEntry::new(
            seq,
            MutationKind::Update,
            "orders",
            RecordId::generate(),
            FieldMap::new(),
            NodeId::new("till-1"),
        );
        crate::journal::append(conn, &entry).unwrap();
        entry
    }

    fn conflict_for(entry: &JournalEntry) -> SyncConflict {
        let mut local = FieldMap::new();
        local.insert("total_cents".into(), json!(1200));
        let mut remote = FieldMap::new();
        remote.insert("total_cents".into(), json!(1500));
        SyncConflict::new(
            entry.id.clone(),
            ConflictKind::Version,
            "orders",
            entry.record_id.clone(),
            local,
            Some(remote),
        )
    }

    #[test]
    fn record_and_read_back_round_trips() {
        let conn = conn();
        let entry = seeded_entry(&conn, 1);
        let conflict = conflict_for(&entry);
        let stored = record(&conn, &conflict).unwrap();
        let loaded = get(&conn, &stored.id).unwrap().unwrap();
        assert_eq!(loaded.kind, ConflictKind::Version);
        assert_eq!(loaded.journal_entry_id, entry.id);
        assert_eq!(loaded.local_snapshot.get("total_cents"), Some(&json!(1200)));
        assert_eq!(
            loaded.remote_snapshot.as_ref().unwrap().get("total_cents"),
            Some(&json!(1500))
        );
        assert!(!loaded.is_resolved());
    }

    #[test]
    fn redetection_refreshes_instead_of_duplicating() {
        let conn = conn();
        let entry = seeded_entry(&conn, 1);
        let first = record(&conn, &conflict_for(&entry)).unwrap();

        let mut second = conflict_for(&entry);
        second.kind = ConflictKind::Delete;
        second.remote_snapshot = None;
        let stored = record(&conn, &second).unwrap();

        assert_eq!(stored.id, first.id);
        assert_eq!(list_unresolved(&conn).unwrap().len(), 1);
        let loaded = get(&conn, &first.id).unwrap().unwrap();
        assert_eq!(loaded.kind, ConflictKind::Delete);
        assert!(loaded.remote_snapshot.is_none());
    }

    #[test]
    fn resolution_is_terminal() {
        let conn = conn();
        let entry = seeded_entry(&conn, 1);
        let mut conflict = record(&conn, &conflict_for(&entry)).unwrap();
        conflict.mark_resolved(Resolution::RemoteWins, None, "operator:jo");

        assert!(mark_resolved(&conn, &conflict).unwrap());
        assert!(!mark_resolved(&conn, &conflict).unwrap());

        let loaded = get(&conn, &conflict.id).unwrap().unwrap();
        assert_eq!(loaded.resolution, Some(Resolution::RemoteWins));
        assert_eq!(loaded.resolved_by.as_deref(), Some("operator:jo"));
        assert!(loaded.resolved_at.is_some());
        assert!(list_unresolved(&conn).unwrap().is_empty());
    }

    #[test]
    fn record_blocking_considers_other_entries_only() {
        let conn = conn();
        let entry = seeded_entry(&conn, 1);
        let record_id = entry.record_id.clone();
        record(&conn, &conflict_for(&entry)).unwrap();

        // blocked for a different entry touching the same record
        assert!(has_unresolved_for_record(&conn, "orders", &record_id, Some("other")).unwrap());
        // not blocked for the entry that owns the conflict
        assert!(
            !has_unresolved_for_record(&conn, "orders", &record_id, Some(entry.id.as_str()))
                .unwrap()
        );
        // unrelated record is free
        assert!(
            !has_unresolved_for_record(&conn, "orders", &RecordId::generate(), None).unwrap()
        );
    }
}
