//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records and operations that respect
//! the record contract (no reserved keys in payloads).

use proptest::prelude::*;
use recsync_core::{RecordPointer, WriteOperation, ID_FIELD, VERSION_FIELD};
use serde_json::{Map, Value};

/// Strategy for generating record ids.
pub fn record_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9]{1,12}").expect("Invalid regex")
}

/// Strategy for generating scalar JSON values.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,16}".prop_map(Value::from),
        Just(Value::Null),
    ]
}

/// Strategy for generating record fields without reserved keys.
pub fn fields_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("[a-z][a-z_]{0,9}", scalar_value_strategy(), 0..8).prop_map(
        |fields| {
            fields
                .into_iter()
                .filter(|(key, _)| key != ID_FIELD && key != VERSION_FIELD)
                .collect()
        },
    )
}

/// Strategy for generating pointers into `table`.
pub fn pointer_strategy(table: &'static str) -> impl Strategy<Value = RecordPointer> {
    record_id_strategy().prop_map(move |id| RecordPointer::new(table, id))
}

/// Strategy for generating batches of creates with distinct ids.
pub fn create_batch_strategy(
    table: &'static str,
    max_len: usize,
) -> impl Strategy<Value = Vec<WriteOperation>> {
    prop::collection::btree_map(record_id_strategy(), fields_strategy(), 1..=max_len.max(1))
        .prop_map(move |records| {
            records
                .into_iter()
                .map(|(id, data)| WriteOperation::create(table, id, data))
                .collect()
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases.
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
    /// Quick configuration for fast tests.
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
