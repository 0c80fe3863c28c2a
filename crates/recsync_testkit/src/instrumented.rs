//! A store wrapper that counts calls and can inject interference.

use parking_lot::Mutex;
use recsync_storage::{
    MemoryStore, RecordStore, Row, RowSource, StorageError, StorageResult, StoreTransaction,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

type Hook = Box<dyn FnOnce() + Send>;

/// Storage calls observed by an [`InstrumentedStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Transactions opened.
    pub begins: usize,
    /// `select_by_ids` calls, inside or outside transactions.
    pub selects: usize,
    /// Insert, update and delete statements.
    pub writes: usize,
    /// Commits.
    pub commits: usize,
    /// Rollbacks.
    pub rollbacks: usize,
}

impl StoreStats {
    /// Total number of calls that reached storage.
    pub fn total(&self) -> usize {
        self.begins + self.selects + self.writes + self.commits + self.rollbacks
    }
}

#[derive(Default)]
struct Counters {
    begins: AtomicUsize,
    selects: AtomicUsize,
    writes: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

/// [`MemoryStore`] wrapper for tests.
///
/// Counts every storage call, and can run a one-shot hook right before the
/// first write statement of the next transaction. A hook that commits a
/// competing write simulates another writer slipping in between the
/// conflict check and the save. [`fail_next_commit`](Self::fail_next_commit)
/// simulates a backend that loses the connection at commit time.
#[derive(Default)]
pub struct InstrumentedStore {
    inner: MemoryStore,
    counters: Counters,
    before_write: Mutex<Option<Hook>>,
    fail_commit: AtomicBool,
}

impl InstrumentedStore {
    /// Wraps an empty store with the given tables.
    pub fn with_tables<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: MemoryStore::with_tables(tables),
            ..Self::default()
        }
    }

    /// Returns the wrapped store. Calls made through it are not counted.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Returns the calls counted so far.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            begins: self.counters.begins.load(Ordering::SeqCst),
            selects: self.counters.selects.load(Ordering::SeqCst),
            writes: self.counters.writes.load(Ordering::SeqCst),
            commits: self.counters.commits.load(Ordering::SeqCst),
            rollbacks: self.counters.rollbacks.load(Ordering::SeqCst),
        }
    }

    /// Resets all counters to zero.
    pub fn reset_stats(&self) {
        for counter in [
            &self.counters.begins,
            &self.counters.selects,
            &self.counters.writes,
            &self.counters.commits,
            &self.counters.rollbacks,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    /// Runs `hook` once, right before the next write statement.
    pub fn before_first_write(&self, hook: impl FnOnce() + Send + 'static) {
        *self.before_write.lock() = Some(Box::new(hook));
    }

    /// Makes the next commit discard its writes and fail with a backend error.
    pub fn fail_next_commit(&self) {
        self.fail_commit.store(true, Ordering::SeqCst);
    }

    fn fire_hook(&self) {
        // Take first so the hook may itself write through this store.
        let hook = self.before_write.lock().take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl RowSource for InstrumentedStore {
    fn select_by_ids(&self, table: &str, ids: &[String]) -> StorageResult<Vec<Row>> {
        self.counters.selects.fetch_add(1, Ordering::SeqCst);
        self.inner.select_by_ids(table, ids)
    }
}

impl RecordStore for InstrumentedStore {
    fn begin(&self) -> StorageResult<Box<dyn StoreTransaction + '_>> {
        self.counters.begins.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.begin()?;
        Ok(Box::new(InstrumentedTransaction { inner, store: self }))
    }
}

struct InstrumentedTransaction<'a> {
    inner: Box<dyn StoreTransaction + 'a>,
    store: &'a InstrumentedStore,
}

impl InstrumentedTransaction<'_> {
    fn before_write(&self) {
        self.store.fire_hook();
        self.store.counters.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl RowSource for InstrumentedTransaction<'_> {
    fn select_by_ids(&self, table: &str, ids: &[String]) -> StorageResult<Vec<Row>> {
        self.store.counters.selects.fetch_add(1, Ordering::SeqCst);
        self.inner.select_by_ids(table, ids)
    }
}

impl StoreTransaction for InstrumentedTransaction<'_> {
    fn insert(&mut self, table: &str, row: &Row, at_ms: u64) -> StorageResult<()> {
        self.before_write();
        self.inner.insert(table, row, at_ms)
    }

    fn update_where_version(
        &mut self,
        table: &str,
        row: &Row,
        expected_version: u64,
        at_ms: u64,
    ) -> StorageResult<u64> {
        self.before_write();
        self.inner
            .update_where_version(table, row, expected_version, at_ms)
    }

    fn delete_where_version(
        &mut self,
        table: &str,
        id: &str,
        expected_version: u64,
    ) -> StorageResult<u64> {
        self.before_write();
        self.inner.delete_where_version(table, id, expected_version)
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        self.store.counters.commits.fetch_add(1, Ordering::SeqCst);
        if self.store.fail_commit.swap(false, Ordering::SeqCst) {
            self.inner.rollback()?;
            return Err(StorageError::backend("connection lost during commit"));
        }
        self.inner.commit()
    }

    fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.store.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback()
    }
}
