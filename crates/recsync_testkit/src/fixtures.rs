//! Test fixtures and engine helpers.
//!
//! Provides a fully wired engine over an [`InstrumentedStore`] so tests can
//! drive writes and reads and then assert on storage calls and notices.

use crate::instrumented::InstrumentedStore;
use crate::sinks::RecordingSink;
use recsync_core::{
    CoreResult, MergeApplier, NotificationPublisher, OperationApplier, RecordLoader, RecordMap,
    RecordPointer, TableRegistry, WriteCoordinator, WriteOperation, WriteOutcome, WriteTransaction,
};
use serde_json::{Map, Value};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// A wired engine with observable storage and notifications.
pub struct TestHarness {
    /// Counting store.
    pub store: Arc<InstrumentedStore>,
    /// Registry with the harness tables.
    pub registry: Arc<TableRegistry>,
    /// Collects published notices.
    pub sink: Arc<RecordingSink>,
    /// Publisher feeding `sink`.
    pub publisher: Arc<NotificationPublisher>,
    /// Coordinator under test.
    pub coordinator: Arc<WriteCoordinator>,
    next_txn: AtomicU64,
}

impl TestHarness {
    /// Creates a harness whose tables are registered under their own names.
    pub fn new(tables: &[&str]) -> Self {
        Self::with_applier(tables, Arc::new(MergeApplier::new()))
    }

    /// Creates a harness with a custom applier.
    pub fn with_applier(tables: &[&str], applier: Arc<dyn OperationApplier>) -> Self {
        let store = Arc::new(InstrumentedStore::with_tables(tables.iter().copied()));

        let mut registry = TableRegistry::new();
        for table in tables {
            registry
                .register(table, None)
                .expect("Failed to register table");
        }
        let registry = registry.into_shared();

        let sink = Arc::new(RecordingSink::new());
        let publisher = Arc::new(
            NotificationPublisher::start(sink.clone()).expect("Failed to start publisher"),
        );
        let coordinator = Arc::new(
            WriteCoordinator::new(store.clone(), Arc::clone(&registry), applier)
                .with_publisher(Arc::clone(&publisher)),
        );

        Self {
            store,
            registry,
            sink,
            publisher,
            coordinator,
            next_txn: AtomicU64::new(1),
        }
    }

    /// Runs a write as author `"u1"`.
    pub fn write(&self, operations: Vec<WriteOperation>) -> CoreResult<WriteOutcome> {
        let id = self.next_txn.fetch_add(1, Ordering::SeqCst);
        self.coordinator
            .execute(&WriteTransaction::new(format!("txn-{id}"), "u1", operations))
    }

    /// Reads committed state.
    pub fn read(&self, pointers: &[RecordPointer]) -> CoreResult<RecordMap> {
        RecordLoader::new(&self.registry).load(&*self.store, pointers)
    }

    /// Creates a record and returns its version.
    pub fn seed(&self, table: &str, id: &str, data: Value) -> u64 {
        let outcome = self
            .write(vec![WriteOperation::create(table, id, object(data))])
            .expect("Failed to seed record");
        outcome
            .record_map
            .version_of(&RecordPointer::new(table, id))
            .expect("Seeded record missing from outcome")
    }

    /// Waits for scheduled notices to reach the sink.
    pub fn flush(&self) {
        self.publisher.flush();
    }
}

/// Converts a JSON object literal into record fields.
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Writes `value` to a temporary JSON file that lives as long as the handle.
pub fn json_file(value: &Value) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    serde_json::to_writer_pretty(&mut file, value).expect("Failed to write JSON");
    file.flush().expect("Failed to flush temp file");
    file
}
