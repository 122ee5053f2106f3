//! Property-based test generators using proptest.
//!
//! Provides strategies for record ids, table names, row payloads and
//! mutations, shaped like the data the engine journals and replays.

use proptest::prelude::*;
use serde_json::Value;

use tillsync_model::{FieldMap, Mutation, MutationKind, RecordId};

/// Strategy for generating UUID-shaped record ids.
pub fn record_id_strategy() -> impl Strategy<Value = RecordId> {
    prop::string::string_regex(
        "[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}",
    )
    .expect("valid regex")
    .prop_map(RecordId::from_trusted)
}

/// Strategy for generating valid table names.
pub fn table_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,23}").expect("valid regex")
}

/// Strategy for generating field names as the row helpers expect them.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z_]{0,9}").expect("valid regex")
}

/// Strategy for generating scalar JSON field values.
pub fn field_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        prop::string::string_regex("[ -~]{0,16}")
            .expect("valid regex")
            .prop_map(Value::from),
    ]
}

/// Strategy for generating row payloads of one to six scalar fields.
pub fn field_map_strategy() -> impl Strategy<Value = FieldMap> {
    prop::collection::btree_map(field_name_strategy(), field_value_strategy(), 1..6)
        .prop_map(|map| map.into_iter().collect())
}

/// Strategy for generating mutation kinds with realistic weights.
pub fn mutation_kind_strategy() -> impl Strategy<Value = MutationKind> {
    prop_oneof![
        3 => Just(MutationKind::Insert),
        2 => Just(MutationKind::Update),
        1 => Just(MutationKind::Delete),
    ]
}

/// Strategy for generating complete mutations.
pub fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    (
        mutation_kind_strategy(),
        table_name_strategy(),
        record_id_strategy(),
        field_map_strategy(),
    )
        .prop_map(|(kind, table, id, payload)| match kind {
            MutationKind::Insert => Mutation::insert_with_id(table, id, payload),
            MutationKind::Update => Mutation::update(table, id, payload),
            MutationKind::Delete => Mutation::delete(table, id),
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
