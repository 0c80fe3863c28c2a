//! Store trait definitions.

use crate::error::StorageResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored row: primary key, version column and the remaining columns.
///
/// `data` never contains `id` or `version`; those live in their own
/// columns so that version predicates can be evaluated by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Primary key.
    pub id: String,
    /// Optimistic-lock version column.
    pub version: u64,
    /// All other columns.
    pub data: Map<String, Value>,
}

impl Row {
    /// Creates a new row.
    pub fn new(id: impl Into<String>, version: u64, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            version,
            data,
        }
    }
}

/// Read access to rows, either committed state or inside a transaction.
pub trait RowSource {
    /// Selects every row of `table` whose id is in `ids`.
    ///
    /// Ids that do not exist are skipped; the result order is unspecified.
    /// Implementations must issue one query per call regardless of how
    /// many ids are requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist or the backend fails.
    fn select_by_ids(&self, table: &str, ids: &[String]) -> StorageResult<Vec<Row>>;
}

/// A relational record store reachable through a generic query interface.
///
/// # Invariants
///
/// - Reads outside a transaction see committed state only
/// - `begin` returns a transaction whose writes become visible atomically
///   on `commit` and are discarded on `rollback` or drop
/// - Concurrent transactions mutating the same row are serialized by the
///   store; version-guarded statements evaluate against the latest
///   committed row
pub trait RecordStore: RowSource + Send + Sync {
    /// Opens a new storage transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot start a transaction.
    fn begin(&self) -> StorageResult<Box<dyn StoreTransaction + '_>>;
}

/// An open storage transaction.
///
/// Reads through the [`RowSource`] impl observe the transaction's own
/// uncommitted writes on top of committed state.
pub trait StoreTransaction: RowSource {
    /// Inserts a new row.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::DuplicateKey`] if the id already exists.
    fn insert(&mut self, table: &str, row: &Row, at_ms: u64) -> StorageResult<()>;

    /// `UPDATE table SET ... WHERE id = row.id AND version = expected_version`.
    ///
    /// Returns the number of affected rows (0 or 1).
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist or the backend fails.
    fn update_where_version(
        &mut self,
        table: &str,
        row: &Row,
        expected_version: u64,
        at_ms: u64,
    ) -> StorageResult<u64>;

    /// `DELETE FROM table WHERE id = id AND version = expected_version`.
    ///
    /// Returns the number of affected rows (0 or 1).
    ///
    /// # Errors
    ///
    /// Returns an error if the table does not exist or the backend fails.
    fn delete_where_version(
        &mut self,
        table: &str,
        id: &str,
        expected_version: u64,
    ) -> StorageResult<u64>;

    /// Commits all writes atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; no write is then visible.
    fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Discards all writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to roll back.
    fn rollback(self: Box<Self>) -> StorageResult<()>;
}
