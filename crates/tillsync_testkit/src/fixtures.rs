//! Engine fixtures and point-of-sale row builders.
//!
//! Provides a ready-wired engine over an [`InMemoryRemote`], the standard
//! till table policy, and builders for the rows every sync scenario keeps
//! reconstructing.

use std::path::PathBuf;

use serde_json::{json, Value};
use tempfile::TempDir;

use tillsync_engine::{EngineConfig, SyncEngine};
use tillsync_local::LocalStore;
use tillsync_model::{FeatureFlags, FieldMap, TableAccess, WritePolicy};

use crate::remote::InMemoryRemote;

/// The standard till policy: the catalog is remote-only, the sales tables
/// keep working offline, refunds need the `offline_refunds` flag.
pub fn pos_policy() -> WritePolicy {
    WritePolicy::new()
        .with_table("products", TableAccess::RemoteOnly)
        .and_then(|p| p.with_table("orders", TableAccess::OfflineCapable))
        .and_then(|p| p.with_table("order_lines", TableAccess::OfflineCapable))
        .and_then(|p| p.with_table("payments", TableAccess::OfflineCapable))
        .and_then(|p| p.with_table("inventory_levels", TableAccess::OfflineCapable))
        .and_then(|p| {
            p.with_table(
                "refunds",
                TableAccess::Gated {
                    feature: "offline_refunds".into(),
                },
            )
        })
        .expect("till tables are distinct")
}

/// Feature flags with offline refunds enabled.
pub fn refunds_enabled() -> FeatureFlags {
    FeatureFlags::new().enable("offline_refunds")
}

/// A terminal configuration over [`pos_policy`].
pub fn pos_config(store_id: &str) -> EngineConfig {
    EngineConfig::new(store_id).with_write_policy(pos_policy())
}

/// Extracts the field map from a `json!` object literal.
pub fn fields(value: Value) -> FieldMap {
    value
        .as_object()
        .cloned()
        .expect("row builders emit objects")
}

/// A catalog row.
pub fn product_row(id: &str, name: &str, price_cents: i64) -> FieldMap {
    fields(json!({
        "id": id,
        "name": name,
        "price_cents": price_cents,
    }))
}

/// An order row.
pub fn order_row(id: &str, status: &str, total_cents: i64) -> FieldMap {
    fields(json!({
        "id": id,
        "status": status,
        "total_cents": total_cents,
    }))
}

/// An order line row.
pub fn order_line_row(id: &str, order_id: &str, product_id: &str, quantity: i64) -> FieldMap {
    fields(json!({
        "id": id,
        "order_id": order_id,
        "product_id": product_id,
        "quantity": quantity,
    }))
}

/// A card payment row.
pub fn payment_row(id: &str, amount_cents: i64) -> FieldMap {
    fields(json!({
        "id": id,
        "amount_cents": amount_cents,
        "method": "card",
    }))
}

/// A per-location stock row.
pub fn inventory_row(id: &str, product_id: &str, location: &str, on_hand: i64) -> FieldMap {
    fields(json!({
        "id": id,
        "product_id": product_id,
        "location": location,
        "on_hand": on_hand,
    }))
}

/// A refund row.
pub fn refund_row(id: &str, order_id: &str, amount_cents: i64) -> FieldMap {
    fields(json!({
        "id": id,
        "order_id": order_id,
        "amount_cents": amount_cents,
        "reason": "customer return",
    }))
}

/// A sync engine wired to an [`InMemoryRemote`], with automatic cleanup.
pub struct TestEngine {
    /// The engine under test.
    pub engine: SyncEngine<InMemoryRemote>,
    /// A handle on the shared remote, for seeding and fault injection.
    pub remote: InMemoryRemote,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestEngine {
    /// Creates an engine over an in-memory local store and [`pos_config`].
    pub fn memory() -> Self {
        Self::with_config(pos_config("store-1"))
    }

    /// Creates an in-memory engine with the given configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        let remote = InMemoryRemote::new();
        let local = LocalStore::open_in_memory().expect("failed to open in-memory local store");
        let engine =
            SyncEngine::new(config, remote.clone(), local).expect("failed to start engine");
        Self {
            engine,
            remote,
            _temp_dir: None,
        }
    }

    /// Creates an engine over a file-backed local store, for scenarios that
    /// reopen the store and check what survived.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let remote = InMemoryRemote::new();
        let local = LocalStore::open(temp_dir.path().join("till.db"))
            .expect("failed to open local store file");
        let engine = SyncEngine::new(pos_config("store-1"), remote.clone(), local)
            .expect("failed to start engine");
        Self {
            engine,
            remote,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the local store path if file-backed, `None` if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join("till.db"))
    }
}

impl std::ops::Deref for TestEngine {
    type Target = SyncEngine<InMemoryRemote>;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// Runs a test against a fresh in-memory engine.
///
/// # Example
///
/// ```rust,ignore
/// use tillsync_testkit::with_engine;
///
/// #[test]
/// fn my_test() {
///     with_engine(|engine, remote| {
///         remote.seed("products", product_row("sku-1", "espresso", 250));
///         // ... test operations
///     });
/// }
/// ```
pub fn with_engine<F, R>(f: F) -> R
where
    F: FnOnce(&SyncEngine<InMemoryRemote>, &InMemoryRemote) -> R,
{
    let fixture = TestEngine::memory();
    f(&fixture.engine, &fixture.remote)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use tillsync_model::{Mutation, RecordId};

    /// Seeds the remote with a two-product catalog and floor stock.
    pub fn stocked_remote(remote: &InMemoryRemote) {
        remote.seed("products", product_row("sku-1", "espresso", 250));
        remote.seed("products", product_row("sku-2", "croissant", 320));
        remote.seed(
            "inventory_levels",
            inventory_row("inv-1", "sku-1", "floor", 50),
        );
        remote.seed(
            "inventory_levels",
            inventory_row("inv-2", "sku-2", "floor", 20),
        );
    }

    /// Journals `count` orders while offline, returning their record ids.
    pub fn offline_orders(fixture: &TestEngine, count: usize) -> Vec<RecordId> {
        fixture.engine.set_online(false);
        (0..count)
            .map(|i| {
                let id = RecordId::generate();
                fixture
                    .engine
                    .mutate(Mutation::insert_with_id(
                        "orders",
                        id.clone(),
                        order_row(id.as_str(), "open", 500 + i as i64 * 100),
                    ))
                    .expect("offline order insert");
                id
            })
            .collect()
    }
}
