//! Predicate query compilation and storage encodings.
//!
//! Filters compile to `json_extract` expressions over the `payload` column.
//! Field and table names are interpolated into SQL text, so they pass a
//! strict identifier check first; values are always bound as parameters.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use tillsync_model::{Filter, Query, SortOrder};

use crate::error::{LocalError, LocalResult};

/// Returns true for names safe to splice into SQL: ASCII identifiers of at
/// most 64 characters, starting with a letter or underscore.
pub(crate) fn valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 64
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validates an identifier, passing it through on success.
pub(crate) fn check_identifier(name: &str) -> LocalResult<&str> {
    if valid_identifier(name) {
        Ok(name)
    } else {
        Err(LocalError::InvalidIdentifier {
            name: name.to_string(),
        })
    }
}

/// A compiled query: SQL text to append after the base `WHERE table_name = ?`
/// clause, plus the parameters it binds (in order, after the table name).
#[derive(Debug)]
pub(crate) struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Compiles a [`Query`] into SQL clauses over the `rows.payload` column.
pub(crate) fn compile(query: &Query) -> LocalResult<CompiledQuery> {
    let mut sql = String::new();
    let mut params = Vec::new();

    for filter in &query.filters {
        let field = check_identifier(filter.field())?;
        let expr = format!("json_extract(payload, '$.{field}')");
        match filter {
            Filter::Eq { value, .. } => push_binary(&mut sql, &mut params, &expr, "=", field, value)?,
            Filter::Ne { value, .. } => {
                push_binary(&mut sql, &mut params, &expr, "!=", field, value)?;
            }
            Filter::Gt { value, .. } => push_binary(&mut sql, &mut params, &expr, ">", field, value)?,
            Filter::Gte { value, .. } => {
                push_binary(&mut sql, &mut params, &expr, ">=", field, value)?;
            }
            Filter::Lt { value, .. } => push_binary(&mut sql, &mut params, &expr, "<", field, value)?,
            Filter::Lte { value, .. } => {
                push_binary(&mut sql, &mut params, &expr, "<=", field, value)?;
            }
            Filter::In { values, .. } => {
                if values.is_empty() {
                    // An empty IN list matches nothing.
                    sql.push_str(" AND 0");
                    continue;
                }
                sql.push_str(" AND ");
                sql.push_str(&expr);
                sql.push_str(" IN (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    sql.push('?');
                    params.push(bind_scalar(field, value)?);
                }
                sql.push(')');
            }
            Filter::Like { pattern, .. } => {
                sql.push_str(" AND ");
                sql.push_str(&expr);
                sql.push_str(" LIKE ?");
                params.push(SqlValue::Text(pattern.clone()));
            }
            Filter::IsNull { .. } => {
                sql.push_str(" AND ");
                sql.push_str(&expr);
                sql.push_str(" IS NULL");
            }
        }
    }

    if !query.order.is_empty() {
        sql.push_str(" ORDER BY ");
        for (i, order) in query.order.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            let field = check_identifier(order.field())?;
            sql.push_str(&format!("json_extract(payload, '$.{field}')"));
            match order {
                SortOrder::Asc(_) => sql.push_str(" ASC"),
                SortOrder::Desc(_) => sql.push_str(" DESC"),
            }
        }
    }

    match (query.limit, query.offset) {
        (Some(limit), Some(offset)) => {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(SqlValue::Integer(clamp_u64(limit)));
            params.push(SqlValue::Integer(clamp_u64(offset)));
        }
        (Some(limit), None) => {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::Integer(clamp_u64(limit)));
        }
        (None, Some(offset)) => {
            // SQLite requires LIMIT before OFFSET; -1 means unlimited.
            sql.push_str(" LIMIT -1 OFFSET ?");
            params.push(SqlValue::Integer(clamp_u64(offset)));
        }
        (None, None) => {}
    }

    Ok(CompiledQuery { sql, params })
}

fn push_binary(
    sql: &mut String,
    params: &mut Vec<SqlValue>,
    expr: &str,
    op: &str,
    field: &str,
    value: &Value,
) -> LocalResult<()> {
    sql.push_str(" AND ");
    sql.push_str(expr);
    sql.push(' ');
    sql.push_str(op);
    sql.push_str(" ?");
    params.push(bind_scalar(field, value)?);
    Ok(())
}

/// Converts a scalar JSON value to a bindable SQL value.
///
/// Booleans bind as integers because `json_extract` yields 0/1 for JSON
/// booleans. Arrays, objects and nulls are not bindable filter values
/// (null checks use `IsNull`).
fn bind_scalar(field: &str, value: &Value) -> LocalResult<SqlValue> {
    match value {
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(SqlValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(SqlValue::Real(f))
            } else {
                Err(LocalError::FilterValue {
                    field: field.to_string(),
                })
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => Err(LocalError::FilterValue {
            field: field.to_string(),
        }),
    }
}

fn clamp_u64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Encodes a timestamp as fixed-width RFC 3339 text (microseconds, `Z`).
///
/// Fixed width makes lexicographic order in SQL equal chronological order.
pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Decodes a stored timestamp.
pub(crate) fn decode_ts(raw: &str) -> LocalResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| LocalError::decode(format!("bad timestamp: {raw}")))
}
