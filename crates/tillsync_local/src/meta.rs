//! Engine metadata: a small key/value table.
//!
//! Holds the journal sequence counter and the terminal's edge-node record.
//! The sequence is read-and-bumped inside the caller's transaction so that
//! entry order equals commit order even under concurrent writers.

use rusqlite::{params, Connection, OptionalExtension};

use tillsync_model::EdgeNode;

use crate::error::{LocalError, LocalResult};

const NEXT_SEQ_KEY: &str = "next_seq";
const EDGE_NODE_KEY: &str = "edge_node";

pub(crate) fn get(conn: &Connection, key: &str) -> LocalResult<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM sync_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub(crate) fn set(conn: &Connection, key: &str, value: &str) -> LocalResult<()> {
    conn.execute(
        "INSERT INTO sync_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// Allocates the next journal sequence number.
pub(crate) fn next_seq(conn: &Connection) -> LocalResult<u64> {
    let seq = match get(conn, NEXT_SEQ_KEY)? {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| LocalError::decode(format!("bad sequence counter: {raw}")))?,
        None => 1,
    };
    set(conn, NEXT_SEQ_KEY, &(seq + 1).to_string())?;
    Ok(seq)
}

pub(crate) fn load_node(conn: &Connection) -> LocalResult<Option<EdgeNode>> {
    match get(conn, EDGE_NODE_KEY)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub(crate) fn save_node(conn: &Connection, node: &EdgeNode) -> LocalResult<()> {
    set(conn, EDGE_NODE_KEY, &serde_json::to_string(node)?)
}
