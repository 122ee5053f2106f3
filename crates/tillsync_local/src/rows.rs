//! Business-row mirror operations.
//!
//! All rows live in one physical table keyed by `(table_name, record_id)`,
//! with the row itself stored as a JSON payload that always carries its own
//! `id` field. These functions take a bare connection so they work the same
//! inside and outside an explicit transaction scope.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use tillsync_model::{FieldMap, Query, RecordId};

use crate::error::{LocalError, LocalResult};
use crate::sql::{self, check_identifier};

fn decode_payload(text: &str) -> LocalResult<FieldMap> {
    Ok(serde_json::from_str(text)?)
}

fn encode_payload(row: &FieldMap) -> LocalResult<String> {
    Ok(serde_json::to_string(row)?)
}

fn updated_at_of(row: &FieldMap) -> Option<String> {
    row.get("updated_at")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Normalizes a payload into a stored row: the `id` field always present and
/// equal to the record id.
fn normalize(id: &RecordId, mut payload: FieldMap) -> FieldMap {
    payload.insert("id".to_string(), Value::String(id.as_str().to_string()));
    payload
}

pub(crate) fn select(conn: &Connection, table: &str, query: &Query) -> LocalResult<Vec<FieldMap>> {
    check_identifier(table)?;
    let compiled = sql::compile(query)?;
    let full = format!(
        "SELECT payload FROM rows WHERE table_name = ?{}",
        compiled.sql
    );
    let mut bound = Vec::with_capacity(compiled.params.len() + 1);
    bound.push(SqlValue::Text(table.to_string()));
    bound.extend(compiled.params);

    let mut stmt = conn.prepare(&full)?;
    let rows = stmt.query_and_then(
        rusqlite::params_from_iter(bound),
        |row| -> LocalResult<FieldMap> {
            let text: String = row.get(0)?;
            decode_payload(&text)
        },
    )?;
    rows.collect()
}

pub(crate) fn select_one(
    conn: &Connection,
    table: &str,
    id: &RecordId,
) -> LocalResult<Option<FieldMap>> {
    check_identifier(table)?;
    let text: Option<String> = conn
        .query_row(
            "SELECT payload FROM rows WHERE table_name = ?1 AND record_id = ?2",
            params![table, id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    text.as_deref().map(decode_payload).transpose()
}

pub(crate) fn insert(
    conn: &Connection,
    table: &str,
    id: &RecordId,
    payload: FieldMap,
) -> LocalResult<FieldMap> {
    check_identifier(table)?;
    let row = normalize(id, payload);
    let text = encode_payload(&row)?;
    let result = conn.execute(
        "INSERT INTO rows (table_name, record_id, payload, updated_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![table, id.as_str(), text, updated_at_of(&row)],
    );
    match result {
        Ok(_) => Ok(row),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(LocalError::RowExists {
                table: table.to_string(),
                record_id: id.to_string(),
            })
        }
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn update(
    conn: &Connection,
    table: &str,
    id: &RecordId,
    patch: &FieldMap,
) -> LocalResult<FieldMap> {
    let mut row = select_one(conn, table, id)?.ok_or_else(|| LocalError::RowNotFound {
        table: table.to_string(),
        record_id: id.to_string(),
    })?;
    for (key, value) in patch {
        row.insert(key.clone(), value.clone());
    }
    let row = normalize(id, row);
    let text = encode_payload(&row)?;
    conn.execute(
        "UPDATE rows SET payload = ?3, updated_at = ?4
         WHERE table_name = ?1 AND record_id = ?2",
        params![table, id.as_str(), text, updated_at_of(&row)],
    )?;
    Ok(row)
}

pub(crate) fn delete(conn: &Connection, table: &str, id: &RecordId) -> LocalResult<FieldMap> {
    let row = select_one(conn, table, id)?.ok_or_else(|| LocalError::RowNotFound {
        table: table.to_string(),
        record_id: id.to_string(),
    })?;
    conn.execute(
        "DELETE FROM rows WHERE table_name = ?1 AND record_id = ?2",
        params![table, id.as_str()],
    )?;
    Ok(row)
}

/// Writes a row unconditionally, replacing any previous version.
///
/// The mirror path uses this: remote truth overwrites whatever the cache
/// held.
pub(crate) fn upsert(
    conn: &Connection,
    table: &str,
    id: &RecordId,
    payload: FieldMap,
) -> LocalResult<FieldMap> {
    check_identifier(table)?;
    let row = normalize(id, payload);
    let text = encode_payload(&row)?;
    conn.execute(
        "INSERT INTO rows (table_name, record_id, payload, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (table_name, record_id) DO UPDATE SET
             payload = excluded.payload,
             updated_at = excluded.updated_at",
        params![table, id.as_str(), text, updated_at_of(&row)],
    )?;
    Ok(row)
}

/// Deletes a row if present, reporting whether anything was removed.
pub(crate) fn remove(conn: &Connection, table: &str, id: &RecordId) -> LocalResult<bool> {
    check_identifier(table)?;
    let changed = conn.execute(
        "DELETE FROM rows WHERE table_name = ?1 AND record_id = ?2",
        params![table, id.as_str()],
    )?;
    Ok(changed > 0)
}
