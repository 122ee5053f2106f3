//! Sync journal persistence.
//!
//! Status transitions are guarded in SQL: each update lists the statuses the
//! state machine accepts as sources, so a stale or illegal transition changes
//! zero rows and is reported as a typed error instead of silently clobbering
//! concurrent progress.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use serde::Serialize;
use tillsync_model::{MutationKind, NodeId, RecordId};
use tillsync_protocol::{EntryStatus, JournalEntry, ProtocolError};

use crate::error::{LocalError, LocalResult};
use crate::sql::{decode_ts, encode_ts};

/// Counts of journal entries by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JournalCounts {
    /// Entries waiting to be replayed.
    pub pending: u64,
    /// Entries a replay cycle currently holds.
    pub syncing: u64,
    /// Entries settled against the remote store.
    pub synced: u64,
    /// Entries blocked on an unresolved conflict.
    pub conflict: u64,
    /// Entries whose last replay attempt failed.
    pub failed: u64,
}

impl JournalCounts {
    /// Total number of journal entries.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.pending + self.syncing + self.synced + self.conflict + self.failed
    }
}

const ENTRY_COLUMNS: &str = "id, seq, operation, table_name, record_id, payload, created_at, \
                             origin_node_id, status, checksum, attempts, last_attempt_at, error";

fn decode_entry(row: &Row<'_>) -> LocalResult<JournalEntry> {
    let operation: String = row.get(2)?;
    let payload: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    let status: String = row.get(8)?;
    let attempts: i64 = row.get(10)?;
    let last_attempt_at: Option<String> = row.get(11)?;

    Ok(JournalEntry {
        id: row.get(0)?,
        seq: row.get::<_, i64>(1)?.unsigned_abs(),
        operation: MutationKind::from_str_opt(&operation)
            .ok_or_else(|| LocalError::decode(format!("unknown operation: {operation}")))?,
        table: row.get(3)?,
        record_id: RecordId::from_trusted(row.get::<_, String>(4)?),
        payload: serde_json::from_str(&payload)?,
        created_at: decode_ts(&created_at)?,
        origin_node_id: NodeId::new(row.get::<_, String>(7)?),
        status: EntryStatus::from_str_opt(&status)
            .ok_or_else(|| LocalError::decode(format!("unknown status: {status}")))?,
        checksum: row.get(9)?,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        last_attempt_at: last_attempt_at.as_deref().map(decode_ts).transpose()?,
        error: row.get(12)?,
    })
}

pub(crate) fn append(conn: &Connection, entry: &JournalEntry) -> LocalResult<()> {
    conn.execute(
        "INSERT INTO sync_journal
             (id, seq, operation, table_name, record_id, payload, created_at,
              origin_node_id, status, checksum, attempts, last_attempt_at, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            entry.id,
            i64::try_from(entry.seq).unwrap_or(i64::MAX),
            entry.operation.as_str(),
            entry.table,
            entry.record_id.as_str(),
            serde_json::to_string(&entry.payload)?,
            encode_ts(entry.created_at),
            entry.origin_node_id.as_str(),
            entry.status.as_str(),
            entry.checksum,
            i64::from(entry.attempts),
            entry.last_attempt_at.map(encode_ts),
            entry.error,
        ],
    )?;
    Ok(())
}

pub(crate) fn get(conn: &Connection, id: &str) -> LocalResult<Option<JournalEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM sync_journal WHERE id = ?1"
    ))?;
    let mut rows = stmt.query_and_then(params![id], |row| decode_entry(row))?;
    rows.next().transpose()
}

/// Pending entries in replay order (`seq` ascending).
pub(crate) fn pending(conn: &Connection, limit: Option<u64>) -> LocalResult<Vec<JournalEntry>> {
    let limit = limit.map_or(-1i64, |l| i64::try_from(l).unwrap_or(i64::MAX));
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM sync_journal
         WHERE status = 'pending' ORDER BY seq ASC LIMIT ?1"
    ))?;
    let rows = stmt.query_and_then(params![limit], |row| decode_entry(row))?;
    rows.collect()
}

/// Recent entries for inspection, newest first, optionally filtered by status.
pub(crate) fn recent(
    conn: &Connection,
    status: Option<EntryStatus>,
    limit: u64,
) -> LocalResult<Vec<JournalEntry>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let entries = match status {
        Some(status) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM sync_journal
                 WHERE status = ?1 ORDER BY seq DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_and_then(params![status.as_str(), limit], |row| {
                decode_entry(row)
            })?;
            rows.collect::<LocalResult<Vec<_>>>()?
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM sync_journal ORDER BY seq DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_and_then(params![limit], |row| decode_entry(row))?;
            rows.collect::<LocalResult<Vec<_>>>()?
        }
    };
    Ok(entries)
}

/// Guarded transition to `to`, accepting exactly the sources the state
/// machine allows. Returns the updated entry.
pub(crate) fn transition(
    conn: &Connection,
    id: &str,
    to: EntryStatus,
) -> LocalResult<JournalEntry> {
    use EntryStatus::{Conflict, Failed, Pending, Synced, Syncing};
    let sources: Vec<&str> = [Pending, Syncing, Synced, Conflict, Failed]
        .into_iter()
        .filter(|s| s.can_transition_to(to))
        .map(EntryStatus::as_str)
        .collect();
    let in_list = sources
        .iter()
        .map(|s| format!("'{s}'"))
        .collect::<Vec<_>>()
        .join(", ");
    let changed = conn.execute(
        &format!("UPDATE sync_journal SET status = ?1 WHERE id = ?2 AND status IN ({in_list})"),
        params![to.as_str(), id],
    )?;
    if changed == 1 {
        return get(conn, id)?.ok_or_else(|| LocalError::EntryNotFound { id: id.to_string() });
    }
    match get(conn, id)? {
        None => Err(LocalError::EntryNotFound { id: id.to_string() }),
        Some(entry) => Err(ProtocolError::TransitionDenied {
            from: entry.status,
            to,
        }
        .into()),
    }
}

/// `pending -> syncing`, stamping the attempt start time.
pub(crate) fn mark_syncing(conn: &Connection, id: &str, at: DateTime<Utc>) -> LocalResult<()> {
    let changed = conn.execute(
        "UPDATE sync_journal SET status = 'syncing', last_attempt_at = ?2
         WHERE id = ?1 AND status = 'pending'",
        params![id, encode_ts(at)],
    )?;
    if changed == 1 {
        return Ok(());
    }
    match get(conn, id)? {
        None => Err(LocalError::EntryNotFound { id: id.to_string() }),
        Some(entry) => Err(ProtocolError::TransitionDenied {
            from: entry.status,
            to: EntryStatus::Syncing,
        }
        .into()),
    }
}

/// `syncing -> failed`, recording the error and bumping the attempt counter.
pub(crate) fn mark_failed(
    conn: &Connection,
    id: &str,
    error: &str,
    at: DateTime<Utc>,
) -> LocalResult<()> {
    let changed = conn.execute(
        "UPDATE sync_journal
         SET status = 'failed', attempts = attempts + 1,
             last_attempt_at = ?3, error = ?2
         WHERE id = ?1 AND status = 'syncing'",
        params![id, error, encode_ts(at)],
    )?;
    if changed == 1 {
        return Ok(());
    }
    match get(conn, id)? {
        None => Err(LocalError::EntryNotFound { id: id.to_string() }),
        Some(entry) => Err(ProtocolError::TransitionDenied {
            from: entry.status,
            to: EntryStatus::Failed,
        }
        .into()),
    }
}

/// Explicit retry: `conflict | failed -> pending`, clearing the last error.
pub(crate) fn retry(conn: &Connection, id: &str) -> LocalResult<JournalEntry> {
    let changed = conn.execute(
        "UPDATE sync_journal SET status = 'pending', error = NULL
         WHERE id = ?1 AND status IN ('conflict', 'failed')",
        params![id],
    )?;
    if changed == 1 {
        return get(conn, id)?.ok_or_else(|| LocalError::EntryNotFound { id: id.to_string() });
    }
    match get(conn, id)? {
        None => Err(LocalError::EntryNotFound { id: id.to_string() }),
        Some(entry) => Err(ProtocolError::TransitionDenied {
            from: entry.status,
            to: EntryStatus::Pending,
        }
        .into()),
    }
}

/// Bulk retry of all `failed` entries.
pub(crate) fn retry_all_failed(conn: &Connection) -> LocalResult<usize> {
    let changed = conn.execute(
        "UPDATE sync_journal SET status = 'pending', error = NULL WHERE status = 'failed'",
        [],
    )?;
    Ok(changed)
}

/// Startup reset: anything left `syncing` by an interrupted cycle goes back
/// to `pending`.
pub(crate) fn reset_interrupted(conn: &Connection) -> LocalResult<usize> {
    let changed = conn.execute(
        "UPDATE sync_journal SET status = 'pending' WHERE status = 'syncing'",
        [],
    )?;
    Ok(changed)
}

pub(crate) fn counts(conn: &Connection) -> LocalResult<JournalCounts> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM sync_journal GROUP BY status")?;
    let mut counts = JournalCounts::default();
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (status, count) = row?;
        let count = count.unsigned_abs();
        match status.as_str() {
            "pending" => counts.pending = count,
            "syncing" => counts.syncing = count,
            "synced" => counts.synced = count,
            "conflict" => counts.conflict = count,
            "failed" => counts.failed = count,
            other => return Err(LocalError::decode(format!("unknown status: {other}"))),
        }
    }
    Ok(counts)
}

/// Deletes `synced` entries whose last activity predates the cutoff.
pub(crate) fn cleanup_synced(conn: &Connection, cutoff: DateTime<Utc>) -> LocalResult<usize> {
    let changed = conn.execute(
        "DELETE FROM sync_journal
         WHERE status = 'synced' AND COALESCE(last_attempt_at, created_at) < ?1",
        params![encode_ts(cutoff)],
    )?;
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use tillsync_model::FieldMap;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::schema::init(&conn).unwrap();
        conn
    }

    fn entry(seq: u64) -> JournalEntry {
        let mut payload = FieldMap::new();
        payload.insert("total_cents".into(), json!(1000));
        JournalEntry::new(
            seq,
            MutationKind::Insert,
            "orders",
            RecordId::generate(),
            payload,
            NodeId::new("till-1"),
        )
    }

    #[test]
    fn append_and_read_back_round_trips() {
        let conn = conn();
        let e = entry(1);
        append(&conn, &e).unwrap();
        let loaded = get(&conn, &e.id).unwrap().unwrap();
        assert_eq!(loaded.seq, 1);
        assert_eq!(loaded.operation, MutationKind::Insert);
        assert_eq!(loaded.checksum, e.checksum);
        assert_eq!(loaded.status, EntryStatus::Pending);
        assert!(loaded.verify_checksum());
    }

    #[test]
    fn duplicate_seq_is_rejected() {
        let conn = conn();
        append(&conn, &entry(5)).unwrap();
        let err = append(&conn, &entry(5)).unwrap_err();
        assert!(matches!(err, LocalError::Sqlite(_)));
    }

    #[test]
    fn pending_returns_seq_order() {
        let conn = conn();
        for seq in [3, 1, 2] {
            append(&conn, &entry(seq)).unwrap();
        }
        let pending = pending(&conn, None).unwrap();
        let seqs: Vec<u64> = pending.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        let limited = super::pending(&conn, Some(2)).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn syncing_then_failed_records_attempt() {
        let conn = conn();
        let e = entry(1);
        append(&conn, &e).unwrap();
        let started = Utc::now();
        mark_syncing(&conn, &e.id, started).unwrap();
        mark_failed(&conn, &e.id, "connection refused", started + Duration::seconds(1)).unwrap();

        let loaded = get(&conn, &e.id).unwrap().unwrap();
        assert_eq!(loaded.status, EntryStatus::Failed);
        assert_eq!(loaded.attempts, 1);
        assert_eq!(loaded.error.as_deref(), Some("connection refused"));
        assert!(loaded.last_attempt_at.is_some());
    }

    #[test]
    fn illegal_transition_is_denied_in_sql() {
        let conn = conn();
        let e = entry(1);
        append(&conn, &e).unwrap();
        // pending -> synced skips syncing
        let err = transition(&conn, &e.id, EntryStatus::Synced).unwrap_err();
        assert!(matches!(
            err,
            LocalError::Protocol(ProtocolError::TransitionDenied { .. })
        ));
        // the row is untouched
        let loaded = get(&conn, &e.id).unwrap().unwrap();
        assert_eq!(loaded.status, EntryStatus::Pending);
    }

    #[test]
    fn transition_on_missing_entry_is_not_found() {
        let conn = conn();
        let err = transition(&conn, "nope", EntryStatus::Synced).unwrap_err();
        assert!(matches!(err, LocalError::EntryNotFound { .. }));
    }

    #[test]
    fn retry_reopens_failed_and_clears_error() {
        let conn = conn();
        let e = entry(1);
        append(&conn, &e).unwrap();
        mark_syncing(&conn, &e.id, Utc::now()).unwrap();
        mark_failed(&conn, &e.id, "boom", Utc::now()).unwrap();

        let reopened = retry(&conn, &e.id).unwrap();
        assert_eq!(reopened.status, EntryStatus::Pending);
        assert_eq!(reopened.attempts, 1);
        assert!(reopened.error.is_none());

        // retrying a pending entry is illegal
        let err = retry(&conn, &e.id).unwrap_err();
        assert!(matches!(
            err,
            LocalError::Protocol(ProtocolError::TransitionDenied { .. })
        ));
    }

    #[test]
    fn reset_interrupted_reopens_only_syncing() {
        let conn = conn();
        let a = entry(1);
        let b = entry(2);
        append(&conn, &a).unwrap();
        append(&conn, &b).unwrap();
        mark_syncing(&conn, &a.id, Utc::now()).unwrap();

        assert_eq!(reset_interrupted(&conn).unwrap(), 1);
        assert_eq!(get(&conn, &a.id).unwrap().unwrap().status, EntryStatus::Pending);
        assert_eq!(get(&conn, &b.id).unwrap().unwrap().status, EntryStatus::Pending);
    }

    #[test]
    fn counts_group_by_status() {
        let conn = conn();
        let a = entry(1);
        let b = entry(2);
        let c = entry(3);
        for e in [&a, &b, &c] {
            append(&conn, e).unwrap();
        }
        mark_syncing(&conn, &a.id, Utc::now()).unwrap();
        transition(&conn, &a.id, EntryStatus::Synced).unwrap();
        mark_syncing(&conn, &b.id, Utc::now()).unwrap();
        mark_failed(&conn, &b.id, "x", Utc::now()).unwrap();

        let counts = counts(&conn).unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.synced, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn cleanup_removes_only_old_synced() {
        let conn = conn();
        let old = entry(1);
        let fresh = entry(2);
        let pending = entry(3);
        for e in [&old, &fresh, &pending] {
            append(&conn, e).unwrap();
        }
        let long_ago = Utc::now() - Duration::days(30);
        mark_syncing(&conn, &old.id, long_ago).unwrap();
        transition(&conn, &old.id, EntryStatus::Synced).unwrap();
        mark_syncing(&conn, &fresh.id, Utc::now()).unwrap();
        transition(&conn, &fresh.id, EntryStatus::Synced).unwrap();

        let removed = cleanup_synced(&conn, Utc::now() - Duration::days(7)).unwrap();
        assert_eq!(removed, 1);
        assert!(get(&conn, &old.id).unwrap().is_none());
        assert!(get(&conn, &fresh.id).unwrap().is_some());
        assert!(get(&conn, &pending.id).unwrap().is_some());
    }

    #[test]
    fn recent_filters_by_status_newest_first() {
        let conn = conn();
        for seq in 1..=4 {
            append(&conn, &entry(seq)).unwrap();
        }
        let all = recent(&conn, None, 10).unwrap();
        assert_eq!(all[0].seq, 4);

        let pending_only = recent(&conn, Some(EntryStatus::Pending), 2).unwrap();
        assert_eq!(pending_only.len(), 2);
        assert_eq!(pending_only[0].seq, 4);
    }
}
