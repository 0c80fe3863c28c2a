//! Batched record loading.

use crate::error::{CoreError, CoreResult};
use crate::record::{RealtimeRecord, RecordMap, RecordPointer};
use crate::registry::TableRegistry;
use recsync_storage::RowSource;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Loads the current state of a set of pointers.
///
/// Pointers are grouped by table and deduplicated, then each distinct
/// table is fetched with a single query. Records that do not exist are
/// simply absent from the resulting map.
#[derive(Debug, Clone, Copy)]
pub struct RecordLoader<'r> {
    registry: &'r TableRegistry,
}

impl<'r> RecordLoader<'r> {
    /// Creates a loader bound to a registry.
    pub fn new(registry: &'r TableRegistry) -> Self {
        Self { registry }
    }

    /// Loads `pointers` from `source` (a store or an open transaction).
    ///
    /// Every table is checked against the registry before the first query
    /// runs.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TableNotAllowed`] for an unregistered table, or a
    /// storage error if a query fails.
    pub fn load<S>(&self, source: &S, pointers: &[RecordPointer]) -> CoreResult<RecordMap>
    where
        S: RowSource + ?Sized,
    {
        let mut by_table: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for pointer in pointers {
            by_table
                .entry(pointer.table.as_str())
                .or_default()
                .insert(pointer.id.as_str());
        }

        let mut batches = Vec::with_capacity(by_table.len());
        for (table, ids) in by_table {
            let physical = self.registry.ensure_allowed(table)?;
            let ids: Vec<String> = ids.into_iter().map(str::to_string).collect();
            batches.push((table, physical, ids));
        }

        let mut map = RecordMap::new();
        for (table, physical, ids) in batches {
            let rows = source.select_by_ids(physical, &ids)?;
            trace!(table, requested = ids.len(), found = rows.len(), "loaded records");

            for row in rows {
                if ids.binary_search(&row.id).is_err() {
                    return Err(CoreError::internal(format!(
                        "store returned unrequested row {} from {physical}",
                        row.id
                    )));
                }
                map.insert(table, RealtimeRecord::from_row(row));
            }
        }

        Ok(map)
    }
}
