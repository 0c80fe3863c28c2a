//! Operation application: computing new record state from operations.
//!
//! Applying operations is a pure function of the originally loaded
//! snapshot and the operation list. It performs no I/O, so the coordinator
//! can run it inside a storage transaction and callers can recompute it on
//! retry.
//!
//! ## Versioning contract
//!
//! - `create` yields version 1 whatever the payload says
//! - `update` yields the original version + 1 and merges only the fields
//!   present in its data
//! - `delete` removes the record from the new snapshot; no placeholder
//! - several operations on one record in a batch fold into one new state,
//!   whose version still advances exactly once

use crate::error::{CoreError, CoreResult};
use crate::operation::{referenced_pointers, WriteOperation};
use crate::record::{RealtimeRecord, RecordMap, RecordPointer, ID_FIELD, VERSION_FIELD};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Result of applying a batch of operations.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    /// Snapshot after the operations. Deleted records are absent.
    pub new_map: RecordMap,
    /// Records whose state differs from the original snapshot, in
    /// first-touch order.
    pub changed: Vec<RecordPointer>,
}

/// Computes new record snapshots from operations.
///
/// Implementations must be deterministic and free of I/O.
pub trait OperationApplier: Send + Sync {
    /// Applies `operations` on top of `original`.
    ///
    /// # Errors
    ///
    /// Returns an error if an operation is invalid for the snapshot.
    fn apply(&self, original: &RecordMap, operations: &[WriteOperation])
        -> CoreResult<ApplyOutcome>;

    /// Returns the records `operations` need loaded before applying.
    fn pointers(&self, operations: &[WriteOperation]) -> Vec<RecordPointer> {
        referenced_pointers(operations)
    }
}

/// The default applier: field-level merge with an immutability policy.
///
/// Payloads may repeat the operation's own `id` and may carry a `version`,
/// which is ignored. Changing `id`, or changing a field declared immutable
/// for its table, is rejected.
#[derive(Debug, Clone, Default)]
pub struct MergeApplier {
    immutable_fields: HashMap<String, HashSet<String>>,
}

impl MergeApplier {
    /// Creates an applier with no immutable fields.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a field that `update` may not change once set.
    #[must_use]
    pub fn with_immutable_field(mut self, table: impl Into<String>, field: impl Into<String>) -> Self {
        self.immutable_fields
            .entry(table.into())
            .or_default()
            .insert(field.into());
        self
    }

    fn is_immutable(&self, table: &str, field: &str) -> bool {
        self.immutable_fields
            .get(table)
            .is_some_and(|fields| fields.contains(field))
    }

    /// Strips reserved keys from a payload.
    fn sanitize(pointer: &RecordPointer, data: &Map<String, Value>) -> CoreResult<Map<String, Value>> {
        if let Some(id) = data.get(ID_FIELD) {
            if id.as_str() != Some(pointer.id.as_str()) {
                return Err(CoreError::invalid_operation(format!(
                    "{pointer}: payload id {id} does not match the record id"
                )));
            }
        }

        let mut fields = data.clone();
        fields.remove(ID_FIELD);
        fields.remove(VERSION_FIELD);
        Ok(fields)
    }

    fn next_version(original: &RecordMap, pointer: &RecordPointer) -> CoreResult<u64> {
        match original.version_of(pointer) {
            None => Ok(1),
            Some(version) => version.checked_add(1).ok_or_else(|| {
                CoreError::internal(format!("{pointer}: version {version} cannot advance"))
            }),
        }
    }
}

impl OperationApplier for MergeApplier {
    fn apply(
        &self,
        original: &RecordMap,
        operations: &[WriteOperation],
    ) -> CoreResult<ApplyOutcome> {
        let mut new_map = original.clone();
        let mut touched = Vec::new();
        let mut seen = HashSet::new();

        for operation in operations {
            let pointer = operation.pointer();
            if seen.insert(pointer.clone()) {
                touched.push(pointer.clone());
            }

            match operation {
                WriteOperation::Create { table, id, data } => {
                    if new_map.contains(&pointer) {
                        return Err(CoreError::invalid_operation(format!(
                            "{pointer}: create on a record that already exists"
                        )));
                    }
                    let fields = Self::sanitize(&pointer, data)?;
                    let version = Self::next_version(original, &pointer)?;
                    new_map.insert(table.clone(), RealtimeRecord::new(id.clone(), version, fields));
                }
                WriteOperation::Update { table, data, .. } => {
                    let Some(current) = new_map.get(&pointer) else {
                        return Err(CoreError::RecordNotFound { pointer });
                    };
                    let patch = Self::sanitize(&pointer, data)?;

                    let mut record = current.clone();
                    for (field, value) in patch {
                        if self.is_immutable(table, &field) {
                            if let Some(existing) = record.fields.get(&field) {
                                if *existing != value {
                                    return Err(CoreError::invalid_operation(format!(
                                        "{pointer}: field {field} is immutable"
                                    )));
                                }
                            }
                        }
                        record.fields.insert(field, value);
                    }
                    record.version = Self::next_version(original, &pointer)?;
                    new_map.insert(table.clone(), record);
                }
                WriteOperation::Delete { .. } => {
                    if new_map.remove(&pointer).is_none() {
                        return Err(CoreError::RecordNotFound { pointer });
                    }
                }
            }
        }

        // A create followed by a delete leaves nothing to persist.
        let changed = touched
            .into_iter()
            .filter(|pointer| original.contains(pointer) || new_map.contains(pointer))
            .collect();

        Ok(ApplyOutcome { new_map, changed })
    }
}
