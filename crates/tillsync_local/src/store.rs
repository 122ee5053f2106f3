//! Local store facade and transaction scope.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;

use tillsync_model::{EdgeNode, FieldMap, Query, RecordId};
use tillsync_protocol::{EntryStatus, JournalEntry, Resolution, SyncConflict};

use crate::error::LocalResult;
use crate::journal::JournalCounts;
use crate::{conflicts, journal, meta, rows, schema};

/// The terminal-resident durable store.
///
/// Wraps one SQLite connection behind a mutex. Individual operations take the
/// lock for the duration of a single statement; [`LocalStore::transaction`]
/// holds it for the whole closure, which is what gives an offline row write
/// and its journal entry a single atomic commit.
///
/// # Opening
///
/// ```rust,ignore
/// let store = LocalStore::open("till.db")?;
/// store.transaction(|txn| {
///     let row = txn.insert("orders", &id, payload)?;
///     let seq = txn.next_seq()?;
///     txn.append_journal(&entry)?;
///     Ok(row)
/// })?;
/// ```
///
/// For tests, use [`LocalStore::open_in_memory`].
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Opens (creating if missing) a store at the given file path.
    pub fn open(path: impl AsRef<Path>) -> LocalResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens an in-memory store, useful for tests.
    pub fn open_in_memory() -> LocalResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> LocalResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        // WAL applies to file databases; in-memory connections report their
        // own mode, which is fine.
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs a closure inside one SQLite transaction.
    ///
    /// Commits when the closure returns `Ok`, rolls back on `Err`. All
    /// multi-statement invariants (row + journal, conflict + entry status)
    /// go through here.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&LocalTxn<'_>) -> LocalResult<T>,
    ) -> LocalResult<T> {
        let mut guard = self.conn.lock();
        let tx = guard.transaction()?;
        let scope = LocalTxn { conn: &tx };
        match f(&scope) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            // Dropping the transaction rolls it back.
            Err(err) => Err(err),
        }
    }

    // ----- business rows -----

    /// Runs a predicate query over one table's mirror.
    pub fn select(&self, table: &str, query: &Query) -> LocalResult<Vec<FieldMap>> {
        rows::select(&self.conn.lock(), table, query)
    }

    /// Fetches one row by id.
    pub fn select_one(&self, table: &str, id: &RecordId) -> LocalResult<Option<FieldMap>> {
        rows::select_one(&self.conn.lock(), table, id)
    }

    /// Inserts a row, failing if the id already exists.
    pub fn insert(&self, table: &str, id: &RecordId, payload: FieldMap) -> LocalResult<FieldMap> {
        rows::insert(&self.conn.lock(), table, id, payload)
    }

    /// Inserts several rows atomically, generating ids where absent.
    pub fn insert_many(
        &self,
        table: &str,
        payloads: Vec<FieldMap>,
    ) -> LocalResult<Vec<FieldMap>> {
        self.transaction(|txn| {
            payloads
                .into_iter()
                .map(|payload| {
                    let id = tillsync_model::row_record_id(&payload)
                        .unwrap_or_else(RecordId::generate);
                    txn.insert(table, &id, payload)
                })
                .collect()
        })
    }

    /// Applies a field patch to an existing row.
    pub fn update(&self, table: &str, id: &RecordId, patch: &FieldMap) -> LocalResult<FieldMap> {
        rows::update(&self.conn.lock(), table, id, patch)
    }

    /// Deletes a row, returning its final snapshot.
    pub fn delete(&self, table: &str, id: &RecordId) -> LocalResult<FieldMap> {
        rows::delete(&self.conn.lock(), table, id)
    }

    /// Writes a row unconditionally (the mirror path).
    pub fn upsert(&self, table: &str, id: &RecordId, payload: FieldMap) -> LocalResult<FieldMap> {
        rows::upsert(&self.conn.lock(), table, id, payload)
    }

    /// Deletes a row if present.
    pub fn remove(&self, table: &str, id: &RecordId) -> LocalResult<bool> {
        rows::remove(&self.conn.lock(), table, id)
    }

    // ----- journal -----

    /// Fetches a journal entry by id.
    pub fn journal_entry(&self, id: &str) -> LocalResult<Option<JournalEntry>> {
        journal::get(&self.conn.lock(), id)
    }

    /// Pending entries in replay order, optionally capped.
    pub fn pending_entries(&self, limit: Option<u64>) -> LocalResult<Vec<JournalEntry>> {
        journal::pending(&self.conn.lock(), limit)
    }

    /// Recent entries for inspection, newest first.
    pub fn recent_entries(
        &self,
        status: Option<EntryStatus>,
        limit: u64,
    ) -> LocalResult<Vec<JournalEntry>> {
        journal::recent(&self.conn.lock(), status, limit)
    }

    /// Journal counts by status.
    pub fn journal_counts(&self) -> LocalResult<JournalCounts> {
        journal::counts(&self.conn.lock())
    }

    /// Marks an entry `syncing`, stamping the attempt start.
    pub fn mark_syncing(&self, id: &str, at: DateTime<Utc>) -> LocalResult<()> {
        journal::mark_syncing(&self.conn.lock(), id, at)
    }

    /// Marks an entry `synced`.
    pub fn mark_synced(&self, id: &str) -> LocalResult<JournalEntry> {
        journal::transition(&self.conn.lock(), id, EntryStatus::Synced)
    }

    /// Marks an entry `conflict`.
    pub fn mark_conflict(&self, id: &str) -> LocalResult<JournalEntry> {
        journal::transition(&self.conn.lock(), id, EntryStatus::Conflict)
    }

    /// Marks an entry `failed`, recording the error.
    pub fn mark_failed(&self, id: &str, error: &str, at: DateTime<Utc>) -> LocalResult<()> {
        journal::mark_failed(&self.conn.lock(), id, error, at)
    }

    /// Reopens a `conflict` or `failed` entry for replay.
    pub fn retry_entry(&self, id: &str) -> LocalResult<JournalEntry> {
        journal::retry(&self.conn.lock(), id)
    }

    /// Reopens all `failed` entries.
    pub fn retry_all_failed(&self) -> LocalResult<usize> {
        journal::retry_all_failed(&self.conn.lock())
    }

    /// Resets entries left `syncing` by an interrupted cycle.
    pub fn reset_interrupted(&self) -> LocalResult<usize> {
        journal::reset_interrupted(&self.conn.lock())
    }

    /// Deletes `synced` entries older than the cutoff.
    pub fn cleanup_synced(&self, cutoff: DateTime<Utc>) -> LocalResult<usize> {
        journal::cleanup_synced(&self.conn.lock(), cutoff)
    }

    // ----- conflicts -----

    /// Fetches a conflict by id.
    pub fn conflict(&self, id: &str) -> LocalResult<Option<SyncConflict>> {
        conflicts::get(&self.conn.lock(), id)
    }

    /// Unresolved conflicts, oldest first.
    pub fn unresolved_conflicts(&self) -> LocalResult<Vec<SyncConflict>> {
        conflicts::list_unresolved(&self.conn.lock())
    }

    /// Records (or refreshes) a detected conflict.
    pub fn record_conflict(&self, conflict: &SyncConflict) -> LocalResult<SyncConflict> {
        conflicts::record(&self.conn.lock(), conflict)
    }

    /// True when another entry's unresolved conflict blocks this record.
    pub fn has_unresolved_conflict(
        &self,
        table: &str,
        record_id: &RecordId,
        exclude_entry: Option<&str>,
    ) -> LocalResult<bool> {
        conflicts::has_unresolved_for_record(&self.conn.lock(), table, record_id, exclude_entry)
    }

    /// Resolves any open conflict recorded for a journal entry.
    ///
    /// Returns `true` when a conflict row was updated. Used when a retried
    /// entry applies cleanly and its earlier conflict is thereby superseded.
    pub fn resolve_conflicts_for_entry(
        &self,
        entry_id: &str,
        resolution: Resolution,
        resolved_by: &str,
        at: DateTime<Utc>,
    ) -> LocalResult<bool> {
        conflicts::resolve_for_entry(&self.conn.lock(), entry_id, resolution, resolved_by, at)
    }

    // ----- metadata -----

    /// Reads a metadata value.
    pub fn meta(&self, key: &str) -> LocalResult<Option<String>> {
        meta::get(&self.conn.lock(), key)
    }

    /// Writes a metadata value.
    pub fn set_meta(&self, key: &str, value: &str) -> LocalResult<()> {
        meta::set(&self.conn.lock(), key, value)
    }

    /// Loads the terminal's edge-node record.
    pub fn load_node(&self) -> LocalResult<Option<EdgeNode>> {
        meta::load_node(&self.conn.lock())
    }

    /// Stores the terminal's edge-node record.
    pub fn save_node(&self, node: &EdgeNode) -> LocalResult<()> {
        meta::save_node(&self.conn.lock(), node)
    }
}

/// Operations available inside a [`LocalStore::transaction`] scope.
///
/// Everything here runs on the transaction's connection: it commits or rolls
/// back as one unit with the rest of the scope.
pub struct LocalTxn<'a> {
    conn: &'a Connection,
}

impl LocalTxn<'_> {
    /// Runs a predicate query over one table's mirror.
    pub fn select(&self, table: &str, query: &Query) -> LocalResult<Vec<FieldMap>> {
        rows::select(self.conn, table, query)
    }

    /// Fetches one row by id.
    pub fn select_one(&self, table: &str, id: &RecordId) -> LocalResult<Option<FieldMap>> {
        rows::select_one(self.conn, table, id)
    }

    /// Inserts a row, failing if the id already exists.
    pub fn insert(&self, table: &str, id: &RecordId, payload: FieldMap) -> LocalResult<FieldMap> {
        rows::insert(self.conn, table, id, payload)
    }

    /// Applies a field patch to an existing row.
    pub fn update(&self, table: &str, id: &RecordId, patch: &FieldMap) -> LocalResult<FieldMap> {
        rows::update(self.conn, table, id, patch)
    }

    /// Deletes a row, returning its final snapshot.
    pub fn delete(&self, table: &str, id: &RecordId) -> LocalResult<FieldMap> {
        rows::delete(self.conn, table, id)
    }

    /// Writes a row unconditionally (the mirror path).
    pub fn upsert(&self, table: &str, id: &RecordId, payload: FieldMap) -> LocalResult<FieldMap> {
        rows::upsert(self.conn, table, id, payload)
    }

    /// Deletes a row if present.
    pub fn remove(&self, table: &str, id: &RecordId) -> LocalResult<bool> {
        rows::remove(self.conn, table, id)
    }

    /// Allocates the next journal sequence number.
    pub fn next_seq(&self) -> LocalResult<u64> {
        meta::next_seq(self.conn)
    }

    /// Appends a journal entry.
    pub fn append_journal(&self, entry: &JournalEntry) -> LocalResult<()> {
        journal::append(self.conn, entry)
    }

    /// Marks an entry `synced`.
    pub fn mark_synced(&self, id: &str) -> LocalResult<JournalEntry> {
        journal::transition(self.conn, id, EntryStatus::Synced)
    }

    /// Persists a conflict resolution; `false` when already resolved.
    pub fn store_resolution(&self, conflict: &SyncConflict) -> LocalResult<bool> {
        conflicts::mark_resolved(self.conn, conflict)
    }

    /// Stores the terminal's edge-node record.
    pub fn save_node(&self, node: &EdgeNode) -> LocalResult<()> {
        meta::save_node(self.conn, node)
    }
}
