//! Atomic multi-table procedures.
//!
//! Procedures run inside one transaction on the authoritative store, so
//! their intermediate states are never journaled and never partially
//! visible. They never run offline: a terminal that cannot reach the
//! remote store gets a typed error instead of a half-settled order.

use serde_json::{json, Value};
use tracing::info;

use tillsync_model::{FieldMap, RecordId};
use tillsync_protocol::ProcedureRequest;

use crate::engine::SyncEngine;
use crate::error::{EngineError, EngineResult};
use crate::remote::RemoteStore;

/// Well-known procedure names the remote store implements.
pub mod procedures {
    /// Inserts a payment, marks the order paid, and decrements inventory,
    /// all or nothing.
    pub const SETTLE_ORDER: &str = "settle-order-with-payment";
    /// Moves stock between locations without a window where it is counted
    /// twice or not at all.
    pub const TRANSFER_INVENTORY: &str = "transfer-inventory";
    /// Validates and applies a batch of journal entries server-side.
    pub const APPLY_SYNC_BATCH: &str = "apply-sync-batch";
}

/// A named procedure invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureCall {
    /// The procedure name.
    pub name: String,
    /// Procedure arguments, as a JSON value.
    pub args: Value,
}

impl ProcedureCall {
    /// Creates a call with raw arguments.
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Builds a settlement call: record `payment` against `order_id`.
    #[must_use]
    pub fn settle_order(order_id: &RecordId, payment: FieldMap) -> Self {
        Self::new(
            procedures::SETTLE_ORDER,
            json!({
                "order_id": order_id.as_str(),
                "payment": payment,
            }),
        )
    }

    /// Builds an inventory transfer between two locations.
    #[must_use]
    pub fn transfer_inventory(
        product_id: &RecordId,
        from_location: &str,
        to_location: &str,
        quantity: i64,
    ) -> Self {
        Self::new(
            procedures::TRANSFER_INVENTORY,
            json!({
                "product_id": product_id.as_str(),
                "from_location": from_location,
                "to_location": to_location,
                "quantity": quantity,
            }),
        )
    }
}

impl<R: RemoteStore> SyncEngine<R> {
    /// Runs a named procedure atomically on the remote store.
    ///
    /// Settlement calls are stamped with the configured overpayment
    /// tolerance unless the caller supplied one. Returns the procedure's
    /// result value.
    pub fn run_atomic(&self, call: &ProcedureCall) -> EngineResult<Value> {
        if !self.connectivity.is_online() {
            return Err(EngineError::ProcedureUnavailableOffline {
                name: call.name.clone(),
            });
        }

        let mut args = call.args.clone();
        if call.name == procedures::SETTLE_ORDER {
            if let Value::Object(map) = &mut args {
                map.entry("overpayment_tolerance_cents")
                    .or_insert_with(|| json!(self.config.overpayment_tolerance_cents));
            }
        }

        let request = ProcedureRequest {
            store_id: self.config.store_id.clone(),
            name: call.name.clone(),
            args,
        };
        match self.remote.run_procedure(&request) {
            Ok(response) => {
                info!(procedure = %call.name, "atomic procedure committed");
                Ok(response.result)
            }
            Err(err) => {
                if err.is_transport() {
                    self.connectivity.set_online(false);
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settle_order_names_the_order_and_payment() {
        let mut payment = FieldMap::new();
        payment.insert("amount_cents".into(), json!(1250));
        payment.insert("method".into(), json!("card"));

        let call = ProcedureCall::settle_order(&RecordId::from_trusted("ord-1"), payment);
        assert_eq!(call.name, procedures::SETTLE_ORDER);
        assert_eq!(call.args["order_id"], json!("ord-1"));
        assert_eq!(call.args["payment"]["amount_cents"], json!(1250));
    }

    #[test]
    fn transfer_inventory_carries_both_locations() {
        let call = ProcedureCall::transfer_inventory(
            &RecordId::from_trusted("sku-9"),
            "backroom",
            "floor",
            12,
        );
        assert_eq!(call.name, procedures::TRANSFER_INVENTORY);
        assert_eq!(call.args["from_location"], json!("backroom"));
        assert_eq!(call.args["to_location"], json!("floor"));
        assert_eq!(call.args["quantity"], json!(12));
    }
}
