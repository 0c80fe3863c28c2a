//! In-memory record store.

use crate::error::{StorageError, StorageResult};
use crate::store::{RecordStore, Row, RowSource, StoreTransaction};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// A committed row together with its bookkeeping columns.
#[derive(Debug, Clone)]
struct StoredRow {
    row: Row,
    created_at_ms: u64,
    updated_at_ms: u64,
}

/// An in-memory record store.
///
/// This store keeps every table in memory and is suitable for:
/// - Unit and integration tests
/// - The CLI replay tool
/// - Ephemeral deployments that don't need persistence
///
/// # Concurrency
///
/// Reads are read-committed and never wait for writers. The first mutating
/// statement of a transaction takes the store-wide writer lock and holds it
/// until the transaction commits, rolls back or is dropped, which stands in
/// for the row locks a relational backend takes on `UPDATE`.
///
/// # Example
///
/// ```rust
/// use recsync_storage::{MemoryStore, RecordStore, Row, RowSource, StoreTransaction};
///
/// let store = MemoryStore::with_tables(["widgets"]);
/// let mut txn = store.begin().unwrap();
/// txn.insert("widgets", &Row::new("w1", 1, Default::default()), 0).unwrap();
/// txn.commit().unwrap();
///
/// let rows = store.select_by_ids("widgets", &["w1".to_string()]).unwrap();
/// assert_eq!(rows[0].version, 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, BTreeMap<String, StoredRow>>>,
    write_lock: Mutex<()>,
}

impl MemoryStore {
    /// Creates a new store with no tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with the given (empty) tables.
    #[must_use]
    pub fn with_tables<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        for table in tables {
            store.create_table(table);
        }
        store
    }

    /// Creates a table if it does not exist yet.
    pub fn create_table(&self, table: impl Into<String>) {
        self.tables.write().entry(table.into()).or_default();
    }

    /// Returns true if the table exists.
    #[must_use]
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.read().contains_key(table)
    }

    /// Returns the number of committed rows in a table.
    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, BTreeMap::len)
    }

    /// Returns every committed row of a table, ordered by id.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .get(table)
            .map(|rows| rows.values().map(|stored| stored.row.clone()).collect())
            .unwrap_or_default()
    }

    /// Returns the `(created_at, updated_at)` markers of a committed row.
    #[must_use]
    pub fn timestamps(&self, table: &str, id: &str) -> Option<(u64, u64)> {
        self.tables
            .read()
            .get(table)
            .and_then(|rows| rows.get(id))
            .map(|stored| (stored.created_at_ms, stored.updated_at_ms))
    }

    fn committed(&self, table: &str, id: &str) -> StorageResult<Option<StoredRow>> {
        let tables = self.tables.read();
        let rows = tables
            .get(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;
        Ok(rows.get(id).cloned())
    }
}

impl RowSource for MemoryStore {
    fn select_by_ids(&self, table: &str, ids: &[String]) -> StorageResult<Vec<Row>> {
        let tables = self.tables.read();
        let rows = tables
            .get(table)
            .ok_or_else(|| StorageError::UnknownTable(table.to_string()))?;

        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id).map(|stored| stored.row.clone()))
            .collect())
    }
}

impl RecordStore for MemoryStore {
    fn begin(&self) -> StorageResult<Box<dyn StoreTransaction + '_>> {
        Ok(Box::new(MemoryTransaction {
            store: self,
            pending: BTreeMap::new(),
            guard: None,
        }))
    }
}

/// A buffered write waiting for commit.
#[derive(Debug, Clone)]
enum PendingWrite {
    Put(StoredRow),
    Delete,
}

/// A transaction over a [`MemoryStore`].
struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    /// (table, id) -> pending write, applied in key order on commit.
    pending: BTreeMap<(String, String), PendingWrite>,
    /// Writer lock, taken on the first mutating statement.
    guard: Option<MutexGuard<'a, ()>>,
}

impl MemoryTransaction<'_> {
    fn lock(&mut self) {
        if self.guard.is_none() {
            self.guard = Some(self.store.write_lock.lock());
        }
    }

    /// Current row as seen by this transaction.
    fn current(&self, table: &str, id: &str) -> StorageResult<Option<StoredRow>> {
        let committed = self.store.committed(table, id)?;
        match self.pending.get(&(table.to_string(), id.to_string())) {
            Some(PendingWrite::Put(stored)) => Ok(Some(stored.clone())),
            Some(PendingWrite::Delete) => Ok(None),
            None => Ok(committed),
        }
    }
}

impl RowSource for MemoryTransaction<'_> {
    fn select_by_ids(&self, table: &str, ids: &[String]) -> StorageResult<Vec<Row>> {
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(stored) = self.current(table, id)? {
                rows.push(stored.row);
            }
        }
        Ok(rows)
    }
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn insert(&mut self, table: &str, row: &Row, at_ms: u64) -> StorageResult<()> {
        self.lock();

        if self.current(table, &row.id)?.is_some() {
            return Err(StorageError::DuplicateKey {
                table: table.to_string(),
                id: row.id.clone(),
            });
        }

        let stored = StoredRow {
            row: row.clone(),
            created_at_ms: at_ms,
            updated_at_ms: at_ms,
        };
        self.pending.insert(
            (table.to_string(), row.id.clone()),
            PendingWrite::Put(stored),
        );
        Ok(())
    }

    fn update_where_version(
        &mut self,
        table: &str,
        row: &Row,
        expected_version: u64,
        at_ms: u64,
    ) -> StorageResult<u64> {
        self.lock();

        let Some(current) = self.current(table, &row.id)? else {
            return Ok(0);
        };
        if current.row.version != expected_version {
            return Ok(0);
        }

        let stored = StoredRow {
            row: row.clone(),
            created_at_ms: current.created_at_ms,
            updated_at_ms: at_ms,
        };
        self.pending.insert(
            (table.to_string(), row.id.clone()),
            PendingWrite::Put(stored),
        );
        Ok(1)
    }

    fn delete_where_version(
        &mut self,
        table: &str,
        id: &str,
        expected_version: u64,
    ) -> StorageResult<u64> {
        self.lock();

        match self.current(table, id)? {
            Some(current) if current.row.version == expected_version => {
                self.pending
                    .insert((table.to_string(), id.to_string()), PendingWrite::Delete);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut tables = self.store.tables.write();

        // Validate first so a failure leaves committed state untouched.
        for (table, _) in self.pending.keys() {
            if !tables.contains_key(table) {
                return Err(StorageError::UnknownTable(table.clone()));
            }
        }

        let count = self.pending.len();
        for ((table, id), write) in self.pending {
            let rows = tables
                .get_mut(&table)
                .ok_or_else(|| StorageError::UnknownTable(table.clone()))?;
            match write {
                PendingWrite::Put(stored) => {
                    rows.insert(id, stored);
                }
                PendingWrite::Delete => {
                    rows.remove(&id);
                }
            }
        }

        debug!(rows = count, "memory store commit");
        Ok(())
    }

    fn rollback(self: Box<Self>) -> StorageResult<()> {
        debug!(rows = self.pending.len(), "memory store rollback");
        Ok(())
    }
}
