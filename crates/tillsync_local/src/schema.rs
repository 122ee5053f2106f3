//! Schema bootstrap for the local store.

use rusqlite::Connection;

use crate::error::{LocalError, LocalResult};

/// Current schema version, recorded in `PRAGMA user_version`.
pub(crate) const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rows (
    table_name TEXT NOT NULL,
    record_id  TEXT NOT NULL,
    payload    TEXT NOT NULL,
    updated_at TEXT,
    PRIMARY KEY (table_name, record_id)
);

CREATE TABLE IF NOT EXISTS sync_journal (
    id              TEXT PRIMARY KEY,
    seq             INTEGER NOT NULL UNIQUE,
    operation       TEXT NOT NULL CHECK (operation IN ('insert', 'update', 'delete')),
    table_name      TEXT NOT NULL,
    record_id       TEXT NOT NULL,
    payload         TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    origin_node_id  TEXT NOT NULL,
    status          TEXT NOT NULL
        CHECK (status IN ('pending', 'syncing', 'synced', 'conflict', 'failed')),
    checksum        TEXT NOT NULL,
    attempts        INTEGER NOT NULL DEFAULT 0,
    last_attempt_at TEXT,
    error           TEXT
);

CREATE INDEX IF NOT EXISTS sync_journal_status_seq_idx
    ON sync_journal (status, seq);
CREATE INDEX IF NOT EXISTS sync_journal_record_idx
    ON sync_journal (table_name, record_id, seq);

CREATE TABLE IF NOT EXISTS sync_conflicts (
    id               TEXT PRIMARY KEY,
    journal_entry_id TEXT NOT NULL REFERENCES sync_journal (id),
    kind             TEXT NOT NULL CHECK (kind IN ('version', 'delete', 'constraint')),
    table_name       TEXT NOT NULL,
    record_id        TEXT NOT NULL,
    local_snapshot   TEXT NOT NULL,
    remote_snapshot  TEXT,
    detected_at      TEXT NOT NULL,
    resolution       TEXT CHECK (resolution IN ('local_wins', 'remote_wins', 'merged')),
    resolved_payload TEXT,
    resolved_by      TEXT,
    resolved_at      TEXT
);

CREATE INDEX IF NOT EXISTS sync_conflicts_record_idx
    ON sync_conflicts (table_name, record_id);
CREATE INDEX IF NOT EXISTS sync_conflicts_entry_idx
    ON sync_conflicts (journal_entry_id);

CREATE TABLE IF NOT EXISTS sync_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Creates all tables and indexes if absent and stamps the schema version.
///
/// Idempotent: safe to run on every open. Rejects databases stamped with a
/// version newer than this build understands.
pub(crate) fn init(conn: &Connection) -> LocalResult<()> {
    let found: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if found > SCHEMA_VERSION {
        return Err(LocalError::SchemaVersion { found });
    }
    conn.execute_batch(SCHEMA)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
