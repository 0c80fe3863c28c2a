//! Record identity, record state and point-in-time record maps.

use recsync_storage::Row;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Field holding a record's identity.
pub const ID_FIELD: &str = "id";

/// Field holding a record's optimistic-lock version.
pub const VERSION_FIELD: &str = "version";

/// Immutable identity of one record: a `(table, id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordPointer {
    /// Logical table name.
    pub table: String,
    /// Record id, unique within the table.
    pub id: String,
}

impl RecordPointer {
    /// Creates a new pointer.
    pub fn new(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for RecordPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.id)
    }
}

/// The current state of one record.
///
/// Serializes as a flat object: `{"id": .., "version": .., ...fields}`.
///
/// # Invariants
///
/// - `version` is 1 on creation
/// - every successful mutation sets `version` to the previous value + 1
/// - `fields` never holds `id` or `version`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeRecord {
    /// Record id.
    pub id: String,
    /// Optimistic-lock version.
    pub version: u64,
    /// Every other field.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RealtimeRecord {
    /// Creates a record, dropping any reserved keys from `fields`.
    pub fn new(id: impl Into<String>, version: u64, mut fields: Map<String, Value>) -> Self {
        fields.remove(ID_FIELD);
        fields.remove(VERSION_FIELD);
        Self {
            id: id.into(),
            version,
            fields,
        }
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Converts a stored row into a record.
    pub fn from_row(row: Row) -> Self {
        Self::new(row.id, row.version, row.data)
    }

    /// Converts this record into a storable row.
    #[must_use]
    pub fn to_row(&self) -> Row {
        Row::new(self.id.clone(), self.version, self.fields.clone())
    }
}

/// A point-in-time snapshot of records: `table -> id -> record`.
///
/// A map may span several tables. It is built per request and discarded
/// afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordMap {
    tables: BTreeMap<String, BTreeMap<String, RealtimeRecord>>,
}

impl RecordMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record a pointer refers to, if present.
    #[must_use]
    pub fn get(&self, pointer: &RecordPointer) -> Option<&RealtimeRecord> {
        self.tables
            .get(&pointer.table)
            .and_then(|records| records.get(&pointer.id))
    }

    /// Returns the version of a record, if present.
    #[must_use]
    pub fn version_of(&self, pointer: &RecordPointer) -> Option<u64> {
        self.get(pointer).map(|record| record.version)
    }

    /// Returns true if the map holds the record.
    #[must_use]
    pub fn contains(&self, pointer: &RecordPointer) -> bool {
        self.get(pointer).is_some()
    }

    /// Returns every record of one table.
    #[must_use]
    pub fn table(&self, table: &str) -> Option<&BTreeMap<String, RealtimeRecord>> {
        self.tables.get(table)
    }

    /// Inserts or replaces a record, returning the previous one.
    pub fn insert(
        &mut self,
        table: impl Into<String>,
        record: RealtimeRecord,
    ) -> Option<RealtimeRecord> {
        self.tables
            .entry(table.into())
            .or_default()
            .insert(record.id.clone(), record)
    }

    /// Removes a record, returning it if it was present.
    pub fn remove(&mut self, pointer: &RecordPointer) -> Option<RealtimeRecord> {
        let records = self.tables.get_mut(&pointer.table)?;
        let removed = records.remove(&pointer.id);
        if records.is_empty() {
            self.tables.remove(&pointer.table);
        }
        removed
    }

    /// Returns a map holding only the given pointers' records.
    #[must_use]
    pub fn restrict_to(&self, pointers: &[RecordPointer]) -> RecordMap {
        let mut restricted = RecordMap::new();
        for pointer in pointers {
            if let Some(record) = self.get(pointer) {
                restricted.insert(pointer.table.clone(), record.clone());
            }
        }
        restricted
    }

    /// Returns pointers to every record, ordered by table then id.
    #[must_use]
    pub fn pointers(&self) -> Vec<RecordPointer> {
        self.tables
            .iter()
            .flat_map(|(table, records)| {
                records
                    .keys()
                    .map(move |id| RecordPointer::new(table.clone(), id.clone()))
            })
            .collect()
    }

    /// Returns the number of records across all tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    /// Returns true if the map holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
