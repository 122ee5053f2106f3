//! An in-memory authoritative store.
//!
//! Implements [`RemoteStore`] over shared state behind a mutex, so a clone
//! handed to the engine and a clone kept by the test observe the same rows.
//! Faults are injected through the same handle: a persistent unreachable
//! flag, a sticky per-record failure, and one-shot scripted failures.
//!
//! Rows are stored exactly as written. The store never stamps timestamps of
//! its own; tests that need a "remote row is newer" situation write through
//! [`InMemoryRemote::write_as_other_terminal`], which sets `updated_at` the
//! way the production backend does for concurrent writers.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

use tillsync_engine::{procedures, EngineError, EngineResult, RemoteStore};
use tillsync_model::{row_record_id, FieldMap, Filter, MutationKind, Query, RecordId, SortOrder};
use tillsync_protocol::{
    classify_replay, payload_checksum, BatchApplyRequest, BatchApplyResponse, BatchEntry,
    EntryOutcome, OutcomeStatus, ProcedureRequest, ProcedureResponse, ReplayDecision,
};

/// A scripted failure consumed by the next remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFault {
    /// The call fails with a retryable transport error.
    Transport,
    /// The call is rejected as unauthorized.
    Unauthorized,
}

#[derive(Default)]
struct RemoteState {
    tables: BTreeMap<String, BTreeMap<String, FieldMap>>,
    unreachable: bool,
    fail_record: Option<String>,
    scripted: VecDeque<RemoteFault>,
    calls: Vec<String>,
}

/// An in-memory [`RemoteStore`] with fault injection.
#[derive(Clone, Default)]
pub struct InMemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl InMemoryRemote {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with a transport error until reverted.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unreachable = !reachable;
    }

    /// Makes any call targeting the given record fail with a transport
    /// error, until [`clear_fail_record`](Self::clear_fail_record).
    pub fn fail_record(&self, record_id: impl Into<String>) {
        self.state.lock().fail_record = Some(record_id.into());
    }

    /// Clears the sticky per-record failure.
    pub fn clear_fail_record(&self) {
        self.state.lock().fail_record = None;
    }

    /// Queues a one-shot fault for the next call.
    pub fn push_fault(&self, fault: RemoteFault) {
        self.state.lock().scripted.push_back(fault);
    }

    /// Seeds a row directly, bypassing fault injection. The row must carry
    /// an `id` field.
    pub fn seed(&self, table: &str, row: FieldMap) {
        let id = row_record_id(&row).expect("seeded row must carry an id");
        self.state
            .lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id.as_str().to_string(), row);
    }

    /// Overwrites a row the way a concurrent terminal would: the patch is
    /// merged in and `updated_at` is stamped with the given time.
    pub fn write_as_other_terminal(
        &self,
        table: &str,
        id: &str,
        patch: FieldMap,
        at: DateTime<Utc>,
    ) {
        let mut state = self.state.lock();
        let row = state
            .tables
            .entry(table.to_string())
            .or_default()
            .entry(id.to_string())
            .or_insert_with(FieldMap::new);
        for (key, value) in patch {
            row.insert(key, value);
        }
        row.insert("id".to_string(), json!(id));
        row.insert("updated_at".to_string(), json!(at.to_rfc3339()));
    }

    /// Deletes a row the way a concurrent terminal would.
    pub fn delete_as_other_terminal(&self, table: &str, id: &str) {
        if let Some(rows) = self.state.lock().tables.get_mut(table) {
            rows.remove(id);
        }
    }

    /// Reads a row without going through fault injection.
    pub fn row(&self, table: &str, id: &str) -> Option<FieldMap> {
        self.state
            .lock()
            .tables
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned()
    }

    /// Number of rows currently in a table.
    pub fn table_len(&self, table: &str) -> usize {
        self.state
            .lock()
            .tables
            .get(table)
            .map_or(0, BTreeMap::len)
    }

    /// Every call the store has served or rejected, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    fn gate(&self, state: &mut RemoteState, call: &str, target: Option<&str>) -> EngineResult<()> {
        state.calls.push(call.to_string());
        if state.unreachable {
            return Err(EngineError::transport_retryable("connection refused"));
        }
        if let Some(fault) = state.scripted.pop_front() {
            return Err(match fault {
                RemoteFault::Transport => {
                    EngineError::transport_retryable("scripted transport failure")
                }
                RemoteFault::Unauthorized => EngineError::Unauthorized("token revoked".into()),
            });
        }
        if let (Some(blocked), Some(target)) = (state.fail_record.as_deref(), target) {
            if blocked == target {
                return Err(EngineError::transport_retryable(format!(
                    "connection reset while touching {target}"
                )));
            }
        }
        Ok(())
    }

    fn settle_order(state: &mut RemoteState, args: &Value) -> EngineResult<Value> {
        let order_id = args["order_id"]
            .as_str()
            .ok_or_else(|| EngineError::RemoteProtocol("settle: order_id missing".into()))?
            .to_string();
        let payment = args["payment"]
            .as_object()
            .cloned()
            .ok_or_else(|| EngineError::RemoteProtocol("settle: payment missing".into()))?;
        let tolerance = args["overpayment_tolerance_cents"].as_i64().unwrap_or(0);

        // Work on a copy; commit only when every step validates.
        let mut tables = state.tables.clone();

        let order = tables
            .get("orders")
            .and_then(|rows| rows.get(&order_id))
            .cloned()
            .ok_or_else(|| EngineError::NotFound {
                table: "orders".into(),
                record_id: order_id.clone(),
            })?;
        if order.get("status").and_then(Value::as_str) == Some("paid") {
            return Err(EngineError::ConstraintViolation(format!(
                "order {order_id} is already settled"
            )));
        }

        let total = order.get("total_cents").and_then(Value::as_i64).unwrap_or(0);
        let amount = payment
            .get("amount_cents")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if amount > total + tolerance {
            return Err(EngineError::OverpaymentRejected {
                excess_cents: amount - total,
                tolerance_cents: tolerance,
            });
        }

        // Decrement stock for each line of the order.
        let lines: Vec<FieldMap> = tables
            .get("order_lines")
            .map(|rows| {
                rows.values()
                    .filter(|line| {
                        line.get("order_id").and_then(Value::as_str) == Some(order_id.as_str())
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for line in &lines {
            let product_id = line
                .get("product_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let quantity = line.get("quantity").and_then(Value::as_i64).unwrap_or(0);
            let level = tables
                .get_mut("inventory_levels")
                .and_then(|rows| {
                    rows.values_mut().find(|row| {
                        row.get("product_id").and_then(Value::as_str)
                            == Some(product_id.as_str())
                    })
                })
                .ok_or_else(|| EngineError::NotFound {
                    table: "inventory_levels".into(),
                    record_id: product_id.clone(),
                })?;
            let on_hand = level.get("on_hand").and_then(Value::as_i64).unwrap_or(0);
            if on_hand < quantity {
                return Err(EngineError::ConstraintViolation(format!(
                    "insufficient stock for {product_id}"
                )));
            }
            level.insert("on_hand".to_string(), json!(on_hand - quantity));
        }

        let payment_id = row_record_id(&payment)
            .unwrap_or_else(RecordId::generate)
            .as_str()
            .to_string();
        let mut payment_row = payment;
        payment_row.insert("id".to_string(), json!(payment_id));
        payment_row.insert("order_id".to_string(), json!(order_id));
        tables
            .entry("payments".to_string())
            .or_default()
            .insert(payment_id.clone(), payment_row);

        let mut settled = order;
        settled.insert("status".to_string(), json!("paid"));
        settled.insert("payment_id".to_string(), json!(payment_id));
        tables
            .entry("orders".to_string())
            .or_default()
            .insert(order_id.clone(), settled);

        state.tables = tables;
        Ok(json!({
            "order_id": order_id,
            "payment_id": payment_id,
            "status": "paid",
        }))
    }

    fn transfer_inventory(state: &mut RemoteState, args: &Value) -> EngineResult<Value> {
        let product_id = args["product_id"]
            .as_str()
            .ok_or_else(|| EngineError::RemoteProtocol("transfer: product_id missing".into()))?
            .to_string();
        let from = args["from_location"].as_str().unwrap_or_default().to_string();
        let to = args["to_location"].as_str().unwrap_or_default().to_string();
        let quantity = args["quantity"].as_i64().unwrap_or(0);

        let mut tables = state.tables.clone();
        let levels = tables.entry("inventory_levels".to_string()).or_default();

        let locate = |rows: &BTreeMap<String, FieldMap>, location: &str| -> Option<String> {
            rows.iter()
                .find(|(_, row)| {
                    row.get("product_id").and_then(Value::as_str) == Some(product_id.as_str())
                        && row.get("location").and_then(Value::as_str) == Some(location)
                })
                .map(|(id, _)| id.clone())
        };

        let from_id = locate(levels, &from).ok_or_else(|| EngineError::NotFound {
            table: "inventory_levels".into(),
            record_id: format!("{product_id}@{from}"),
        })?;
        let from_row = levels.get_mut(&from_id).expect("located row exists");
        let available = from_row.get("on_hand").and_then(Value::as_i64).unwrap_or(0);
        if available < quantity {
            return Err(EngineError::ConstraintViolation(format!(
                "insufficient stock for {product_id} at {from}"
            )));
        }
        from_row.insert("on_hand".to_string(), json!(available - quantity));

        match locate(levels, &to) {
            Some(to_id) => {
                let to_row = levels.get_mut(&to_id).expect("located row exists");
                let held = to_row.get("on_hand").and_then(Value::as_i64).unwrap_or(0);
                to_row.insert("on_hand".to_string(), json!(held + quantity));
            }
            None => {
                let id = RecordId::generate().as_str().to_string();
                let mut row = FieldMap::new();
                row.insert("id".to_string(), json!(id));
                row.insert("product_id".to_string(), json!(product_id));
                row.insert("location".to_string(), json!(to));
                row.insert("on_hand".to_string(), json!(quantity));
                levels.insert(id, row);
            }
        }

        state.tables = tables;
        Ok(json!({ "product_id": product_id, "moved": quantity }))
    }

    fn apply_batch_locked(
        state: &mut RemoteState,
        request: &BatchApplyRequest,
    ) -> BatchApplyResponse {
        let outcomes = request
            .entries
            .iter()
            .map(|entry| Self::apply_batch_entry(state, entry))
            .collect();
        BatchApplyResponse { outcomes }
    }

    fn apply_batch_entry(state: &mut RemoteState, entry: &BatchEntry) -> EntryOutcome {
        if payload_checksum(&entry.payload) != entry.checksum {
            return EntryOutcome {
                entry_id: entry.entry_id.clone(),
                status: OutcomeStatus::Failed,
                error: Some("payload checksum mismatch".into()),
                conflict: None,
                remote_snapshot: None,
            };
        }

        let table = state.tables.entry(entry.table.clone()).or_default();
        let key = entry.record_id.as_str().to_string();
        let current = table.get(&key).cloned();
        let decision = classify_replay(
            entry.operation,
            &entry.payload,
            entry.created_at,
            current.as_ref(),
        );
        match decision {
            ReplayDecision::Apply => {
                let snapshot = match entry.operation {
                    MutationKind::Insert => {
                        let mut row = entry.payload.clone();
                        row.insert("id".to_string(), json!(key));
                        table.insert(key, row.clone());
                        Some(row)
                    }
                    MutationKind::Update => {
                        let mut row = current.unwrap_or_default();
                        for (field, value) in &entry.payload {
                            row.insert(field.clone(), value.clone());
                        }
                        row.insert("id".to_string(), json!(key));
                        table.insert(key, row.clone());
                        Some(row)
                    }
                    MutationKind::Delete => {
                        table.remove(&key);
                        None
                    }
                };
                EntryOutcome {
                    entry_id: entry.entry_id.clone(),
                    status: OutcomeStatus::Synced,
                    error: None,
                    conflict: None,
                    remote_snapshot: snapshot,
                }
            }
            ReplayDecision::AlreadyApplied => EntryOutcome {
                entry_id: entry.entry_id.clone(),
                status: OutcomeStatus::Synced,
                error: None,
                conflict: None,
                remote_snapshot: current,
            },
            ReplayDecision::Conflict(kind) => EntryOutcome {
                entry_id: entry.entry_id.clone(),
                status: OutcomeStatus::Conflict,
                error: None,
                conflict: Some(kind),
                remote_snapshot: current,
            },
        }
    }
}

fn value_matches(filter: &Filter, row: &FieldMap) -> bool {
    let field_value = |field: &str| row.get(field);
    match filter {
        Filter::Eq { field, value } => field_value(field) == Some(value),
        Filter::Ne { field, value } => field_value(field) != Some(value),
        Filter::Gt { field, value } => compare(field_value(field), value) == Some(std::cmp::Ordering::Greater),
        Filter::Gte { field, value } => matches!(
            compare(field_value(field), value),
            Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
        ),
        Filter::Lt { field, value } => compare(field_value(field), value) == Some(std::cmp::Ordering::Less),
        Filter::Lte { field, value } => matches!(
            compare(field_value(field), value),
            Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
        ),
        Filter::In { field, values } => {
            field_value(field).is_some_and(|v| values.contains(v))
        }
        Filter::Like { field, pattern } => field_value(field)
            .and_then(Value::as_str)
            .is_some_and(|text| like_matches(pattern, text)),
        Filter::IsNull { field } => matches!(field_value(field), None | Some(Value::Null)),
    }
}

fn compare(left: Option<&Value>, right: &Value) -> Option<std::cmp::Ordering> {
    match (left?, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Matches an SQL `LIKE` pattern (`%` any run, `_` any single char).
fn like_matches(pattern: &str, text: &str) -> bool {
    fn inner(pattern: &[char], text: &[char]) -> bool {
        match pattern.split_first() {
            None => text.is_empty(),
            Some(('%', rest)) => {
                (0..=text.len()).any(|skip| inner(rest, &text[skip..]))
            }
            Some(('_', rest)) => text
                .split_first()
                .is_some_and(|(_, tail)| inner(rest, tail)),
            Some((ch, rest)) => text
                .split_first()
                .is_some_and(|(t, tail)| t == ch && inner(rest, tail)),
        }
    }
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    inner(&pattern, &text)
}

fn sort_rows(rows: &mut [FieldMap], order: &[SortOrder]) {
    rows.sort_by(|a, b| {
        for sort in order {
            let (field, reverse) = match sort {
                SortOrder::Asc(field) => (field, false),
                SortOrder::Desc(field) => (field, true),
            };
            let ordering = match (a.get(field), b.get(field)) {
                (Some(left), Some(right)) => {
                    compare(Some(left), right).unwrap_or(std::cmp::Ordering::Equal)
                }
                (Some(_), None) => std::cmp::Ordering::Greater,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (None, None) => std::cmp::Ordering::Equal,
            };
            let ordering = if reverse { ordering.reverse() } else { ordering };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
}

impl RemoteStore for InMemoryRemote {
    fn select(&self, table: &str, query: &Query) -> EngineResult<Vec<FieldMap>> {
        let mut state = self.state.lock();
        self.gate(&mut state, &format!("select {table}"), None)?;

        let mut rows: Vec<FieldMap> = state
            .tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|row| query.filters.iter().all(|f| value_matches(f, row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        sort_rows(&mut rows, &query.order);

        let offset = query.offset.unwrap_or(0) as usize;
        let rows = rows.into_iter().skip(offset);
        Ok(match query.limit {
            Some(limit) => rows.take(limit as usize).collect(),
            None => rows.collect(),
        })
    }

    fn select_one(&self, table: &str, id: &RecordId) -> EngineResult<Option<FieldMap>> {
        let mut state = self.state.lock();
        self.gate(
            &mut state,
            &format!("select_one {table}/{}", id.as_str()),
            Some(id.as_str()),
        )?;
        Ok(state
            .tables
            .get(table)
            .and_then(|rows| rows.get(id.as_str()))
            .cloned())
    }

    fn insert(&self, table: &str, payload: &FieldMap) -> EngineResult<FieldMap> {
        let id = row_record_id(payload).unwrap_or_else(RecordId::generate);
        let mut state = self.state.lock();
        self.gate(
            &mut state,
            &format!("insert {table}/{}", id.as_str()),
            Some(id.as_str()),
        )?;

        let rows = state.tables.entry(table.to_string()).or_default();
        if rows.contains_key(id.as_str()) {
            return Err(EngineError::ConstraintViolation(format!(
                "duplicate id {} in {table}",
                id.as_str()
            )));
        }
        let mut row = payload.clone();
        row.insert("id".to_string(), json!(id.as_str()));
        rows.insert(id.as_str().to_string(), row.clone());
        Ok(row)
    }

    fn update(&self, table: &str, id: &RecordId, patch: &FieldMap) -> EngineResult<FieldMap> {
        let mut state = self.state.lock();
        self.gate(
            &mut state,
            &format!("update {table}/{}", id.as_str()),
            Some(id.as_str()),
        )?;

        let row = state
            .tables
            .get_mut(table)
            .and_then(|rows| rows.get_mut(id.as_str()))
            .ok_or_else(|| EngineError::NotFound {
                table: table.to_string(),
                record_id: id.as_str().to_string(),
            })?;
        for (field, value) in patch {
            row.insert(field.clone(), value.clone());
        }
        row.insert("id".to_string(), json!(id.as_str()));
        Ok(row.clone())
    }

    fn delete(&self, table: &str, id: &RecordId) -> EngineResult<Option<FieldMap>> {
        let mut state = self.state.lock();
        self.gate(
            &mut state,
            &format!("delete {table}/{}", id.as_str()),
            Some(id.as_str()),
        )?;
        Ok(state
            .tables
            .get_mut(table)
            .and_then(|rows| rows.remove(id.as_str())))
    }

    fn run_procedure(&self, request: &ProcedureRequest) -> EngineResult<ProcedureResponse> {
        let mut state = self.state.lock();
        self.gate(&mut state, &format!("procedure {}", request.name), None)?;

        let result = match request.name.as_str() {
            procedures::SETTLE_ORDER => Self::settle_order(&mut state, &request.args)?,
            procedures::TRANSFER_INVENTORY => {
                Self::transfer_inventory(&mut state, &request.args)?
            }
            procedures::APPLY_SYNC_BATCH => {
                let batch: BatchApplyRequest = serde_json::from_value(request.args.clone())
                    .map_err(|err| {
                        EngineError::RemoteProtocol(format!("batch args: {err}"))
                    })?;
                let response = Self::apply_batch_locked(&mut state, &batch);
                serde_json::to_value(response)
                    .map_err(|err| EngineError::RemoteProtocol(err.to_string()))?
            }
            other => {
                return Err(EngineError::UnknownProcedure {
                    name: other.to_string(),
                })
            }
        };
        Ok(ProcedureResponse { result })
    }

    fn apply_batch(&self, request: &BatchApplyRequest) -> EngineResult<BatchApplyResponse> {
        let mut state = self.state.lock();
        self.gate(
            &mut state,
            &format!("apply_batch x{}", request.entries.len()),
            None,
        )?;
        Ok(Self::apply_batch_locked(&mut state, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn insert_select_update_delete_round_trip() {
        let remote = InMemoryRemote::new();
        let stored = remote
            .insert("orders", &row(&[("id", json!("ord-1")), ("status", json!("pending"))]))
            .unwrap();
        assert_eq!(stored["status"], json!("pending"));

        let found = remote
            .select_one("orders", &RecordId::from_trusted("ord-1"))
            .unwrap()
            .unwrap();
        assert_eq!(found, stored);

        let patched = remote
            .update(
                "orders",
                &RecordId::from_trusted("ord-1"),
                &row(&[("status", json!("paid"))]),
            )
            .unwrap();
        assert_eq!(patched["status"], json!("paid"));

        let snapshot = remote
            .delete("orders", &RecordId::from_trusted("ord-1"))
            .unwrap()
            .unwrap();
        assert_eq!(snapshot["status"], json!("paid"));
        assert_eq!(remote.table_len("orders"), 0);
    }

    #[test]
    fn duplicate_insert_is_a_constraint_violation() {
        let remote = InMemoryRemote::new();
        remote.seed("orders", row(&[("id", json!("ord-1"))]));
        let err = remote
            .insert("orders", &row(&[("id", json!("ord-1"))]))
            .unwrap_err();
        assert!(matches!(err, EngineError::ConstraintViolation(_)));
    }

    #[test]
    fn unreachable_store_fails_every_call() {
        let remote = InMemoryRemote::new();
        remote.set_reachable(false);
        let err = remote.select("orders", &Query::all()).unwrap_err();
        assert!(err.is_transport());

        remote.set_reachable(true);
        assert!(remote.select("orders", &Query::all()).is_ok());
    }

    #[test]
    fn sticky_record_fault_spares_other_records() {
        let remote = InMemoryRemote::new();
        remote.seed("orders", row(&[("id", json!("ord-1"))]));
        remote.seed("orders", row(&[("id", json!("ord-2"))]));
        remote.fail_record("ord-2");

        assert!(remote
            .select_one("orders", &RecordId::from_trusted("ord-1"))
            .is_ok());
        let err = remote
            .select_one("orders", &RecordId::from_trusted("ord-2"))
            .unwrap_err();
        assert!(err.is_transport());

        remote.clear_fail_record();
        assert!(remote
            .select_one("orders", &RecordId::from_trusted("ord-2"))
            .is_ok());
    }

    #[test]
    fn scripted_fault_fires_once() {
        let remote = InMemoryRemote::new();
        remote.push_fault(RemoteFault::Unauthorized);
        let err = remote.select("orders", &Query::all()).unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));
        assert!(remote.select("orders", &Query::all()).is_ok());
    }

    #[test]
    fn select_applies_filters_order_and_paging() {
        let remote = InMemoryRemote::new();
        for (id, status, cents) in [
            ("o1", "paid", 300),
            ("o2", "pending", 100),
            ("o3", "paid", 200),
        ] {
            remote.seed(
                "orders",
                row(&[
                    ("id", json!(id)),
                    ("status", json!(status)),
                    ("total_cents", json!(cents)),
                ]),
            );
        }
        let rows = remote
            .select(
                "orders",
                &Query::all()
                    .eq("status", json!("paid"))
                    .order_by(SortOrder::Desc("total_cents".into())),
            )
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], json!("o1"));

        let paged = remote
            .select(
                "orders",
                &Query::all()
                    .order_by(SortOrder::Asc("total_cents".into()))
                    .limit(1)
                    .offset(1),
            )
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0]["id"], json!("o3"));
    }

    #[test]
    fn like_patterns_match_sql_semantics() {
        assert!(like_matches("ord-%", "ord-123"));
        assert!(like_matches("%-9", "sku-9"));
        assert!(like_matches("o_d", "ord"));
        assert!(like_matches("or_", "ord"));
        assert!(!like_matches("or_", "orders"));
        assert!(like_matches("%", ""));
        assert!(!like_matches("", "x"));
    }

    #[test]
    fn settle_order_is_atomic_on_insufficient_stock() {
        let remote = InMemoryRemote::new();
        remote.seed(
            "orders",
            row(&[
                ("id", json!("ord-1")),
                ("status", json!("open")),
                ("total_cents", json!(1000)),
            ]),
        );
        remote.seed(
            "order_lines",
            row(&[
                ("id", json!("line-1")),
                ("order_id", json!("ord-1")),
                ("product_id", json!("sku-1")),
                ("quantity", json!(5)),
            ]),
        );
        remote.seed(
            "inventory_levels",
            row(&[
                ("id", json!("inv-1")),
                ("product_id", json!("sku-1")),
                ("location", json!("floor")),
                ("on_hand", json!(2)),
            ]),
        );

        let request = ProcedureRequest {
            store_id: "store-1".into(),
            name: procedures::SETTLE_ORDER.into(),
            args: json!({
                "order_id": "ord-1",
                "payment": {"amount_cents": 1000, "method": "card"},
                "overpayment_tolerance_cents": 0,
            }),
        };
        let err = remote.run_procedure(&request).unwrap_err();
        assert!(matches!(err, EngineError::ConstraintViolation(_)));

        // Nothing committed: no payment, order still open, stock untouched.
        assert_eq!(remote.table_len("payments"), 0);
        assert_eq!(remote.row("orders", "ord-1").unwrap()["status"], json!("open"));
        assert_eq!(
            remote.row("inventory_levels", "inv-1").unwrap()["on_hand"],
            json!(2)
        );
    }

    #[test]
    fn transfer_inventory_moves_stock_between_locations() {
        let remote = InMemoryRemote::new();
        remote.seed(
            "inventory_levels",
            row(&[
                ("id", json!("inv-1")),
                ("product_id", json!("sku-1")),
                ("location", json!("backroom")),
                ("on_hand", json!(10)),
            ]),
        );
        let request = ProcedureRequest {
            store_id: "store-1".into(),
            name: procedures::TRANSFER_INVENTORY.into(),
            args: json!({
                "product_id": "sku-1",
                "from_location": "backroom",
                "to_location": "floor",
                "quantity": 4,
            }),
        };
        let response = remote.run_procedure(&request).unwrap();
        assert_eq!(response.result["moved"], json!(4));
        assert_eq!(
            remote.row("inventory_levels", "inv-1").unwrap()["on_hand"],
            json!(6)
        );
        assert_eq!(remote.table_len("inventory_levels"), 2);
    }

    #[test]
    fn unknown_procedure_is_rejected_by_name() {
        let remote = InMemoryRemote::new();
        let request = ProcedureRequest {
            store_id: "store-1".into(),
            name: "close-the-till".into(),
            args: json!({}),
        };
        let err = remote.run_procedure(&request).unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnknownProcedure { name } if name == "close-the-till"
        ));
    }
}
