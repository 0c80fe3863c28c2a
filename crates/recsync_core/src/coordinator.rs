//! Write transaction coordinator.
//!
//! Runs one [`WriteTransaction`] through
//! `LOADED -> APPLIED -> RECONCILED -> SAVED -> PUBLISHED` inside a single
//! storage transaction, or stops at `FAILED` with a typed error after
//! rolling back. The coordinator holds no state across requests; mutual
//! exclusion between concurrent writers comes from the store's
//! version-guarded statements.

use crate::applier::{ApplyOutcome, OperationApplier};
use crate::conflict::ConflictDetector;
use crate::error::{ConflictStage, CoreError, CoreResult};
use crate::loader::RecordLoader;
use crate::operation::{OperationKind, WriteOperation, WriteTransaction};
use crate::publisher::{NotificationPublisher, VersionNotice};
use crate::record::{RecordMap, RecordPointer};
use crate::registry::TableRegistry;
use crate::saver::RecordSaver;
use recsync_storage::{RecordStore, StoreTransaction};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn};

/// Step a write transaction has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    /// Original records loaded and targets validated.
    Loaded,
    /// New snapshot computed.
    Applied,
    /// Changed records re-checked against storage.
    Reconciled,
    /// New state written and committed.
    Saved,
    /// Notices handed to the publisher.
    Published,
    /// Aborted and rolled back.
    Failed,
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteStage::Loaded => "LOADED",
            WriteStage::Applied => "APPLIED",
            WriteStage::Reconciled => "RECONCILED",
            WriteStage::Saved => "SAVED",
            WriteStage::Published => "PUBLISHED",
            WriteStage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Result of a committed write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutcome {
    /// New state of the modified records. Deleted records are absent.
    pub record_map: RecordMap,
    /// Every record the write modified, deletions included.
    pub modified_records: Vec<RecordPointer>,
}

/// Everything a committed write produced, before it is trimmed for the caller.
struct Committed {
    applied: ApplyOutcome,
    notices: Vec<VersionNotice>,
}

/// Orchestrates load, apply, reconcile and save for write transactions.
pub struct WriteCoordinator {
    store: Arc<dyn RecordStore>,
    registry: Arc<TableRegistry>,
    applier: Arc<dyn OperationApplier>,
    publisher: Option<Arc<NotificationPublisher>>,
}

impl WriteCoordinator {
    /// Creates a coordinator without notifications.
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<TableRegistry>,
        applier: Arc<dyn OperationApplier>,
    ) -> Self {
        Self {
            store,
            registry,
            applier,
            publisher: None,
        }
    }

    /// Announces committed versions through `publisher`.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<NotificationPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Returns the table registry.
    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    /// Executes a write transaction.
    ///
    /// Either every operation is committed or none is. Tables are checked
    /// against the registry before storage is touched.
    ///
    /// # Errors
    ///
    /// - [`CoreError::TableNotAllowed`] for an unregistered table
    /// - [`CoreError::RecordNotFound`] for a missing update/delete target
    /// - [`CoreError::VersionConflict`] if another writer got there first
    /// - [`CoreError::InvalidOperation`] for payloads the applier rejects
    /// - storage and internal errors otherwise
    pub fn execute(&self, transaction: &WriteTransaction) -> CoreResult<WriteOutcome> {
        let span = info_span!(
            "write",
            transaction_id = %transaction.transaction_id,
            author_id = %transaction.author_id
        );
        let _enter = span.enter();

        for operation in &transaction.operations {
            self.registry.ensure_allowed(operation.table())?;
        }
        if transaction.operations.is_empty() {
            debug!("empty write transaction");
            return Ok(WriteOutcome::default());
        }

        let mut txn = self.store.begin()?;
        let result = self.run(txn.as_mut(), &transaction.operations);

        let committed = match result {
            Ok(committed) => match txn.commit() {
                Ok(()) => committed,
                Err(err) => {
                    error!(stage = %WriteStage::Failed, error = %err, "commit failed");
                    return Err(err.into());
                }
            },
            Err(err) => {
                if let Err(rollback_err) = txn.rollback() {
                    error!(error = %rollback_err, "rollback failed");
                }
                log_failure(&err);
                return Err(err);
            }
        };

        let Committed { applied, notices } = committed;
        info!(
            stage = %WriteStage::Saved,
            modified = applied.changed.len(),
            "write committed"
        );

        self.publish(notices);

        Ok(WriteOutcome {
            record_map: applied.new_map.restrict_to(&applied.changed),
            modified_records: applied.changed,
        })
    }

    /// LOAD -> APPLY -> RECONCILE -> SAVE inside `txn`. Does not commit.
    fn run<T>(&self, txn: &mut T, operations: &[WriteOperation]) -> CoreResult<Committed>
    where
        T: StoreTransaction + ?Sized,
    {
        let loader = RecordLoader::new(&self.registry);

        let pointers = self.applier.pointers(operations);
        let original = loader.load(&*txn, &pointers)?;
        validate_targets(&original, operations)?;
        let kinds = KindCounts::of(operations);
        debug!(
            stage = %WriteStage::Loaded,
            records = original.len(),
            creates = kinds.creates,
            updates = kinds.updates,
            deletes = kinds.deletes
        );

        let applied = self.applier.apply(&original, operations)?;
        debug!(stage = %WriteStage::Applied, changed = applied.changed.len());

        let conflicts =
            ConflictDetector::new(loader).detect(&*txn, &original, &applied.changed)?;
        if !conflicts.is_empty() {
            return Err(CoreError::version_conflict(conflicts, ConflictStage::Reconcile));
        }
        debug!(stage = %WriteStage::Reconciled);

        RecordSaver::new(&self.registry).save(txn, &original, &applied.new_map, &applied.changed)?;

        // Built before commit so a record that cannot advance rolls back.
        let notices = version_notices(&original, &applied)?;
        Ok(Committed { applied, notices })
    }

    /// Hands notices for every modified record to the publisher, if any.
    fn publish(&self, notices: Vec<VersionNotice>) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        publisher.schedule(notices);
        debug!(stage = %WriteStage::Published);
    }
}

impl fmt::Debug for WriteCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteCoordinator")
            .field("tables", &self.registry.tables())
            .field("publisher", &self.publisher.is_some())
            .finish_non_exhaustive()
    }
}

/// Operations per kind, for stage logs.
#[derive(Debug, Default, PartialEq, Eq)]
struct KindCounts {
    creates: usize,
    updates: usize,
    deletes: usize,
}

impl KindCounts {
    fn of(operations: &[WriteOperation]) -> Self {
        let mut counts = Self::default();
        for operation in operations {
            match operation.kind() {
                OperationKind::Create => counts.creates += 1,
                OperationKind::Update => counts.updates += 1,
                OperationKind::Delete => counts.deletes += 1,
            }
        }
        counts
    }
}

/// One notice per changed record. A deleted record is announced at the
/// version its deletion would have produced.
fn version_notices(
    original: &RecordMap,
    applied: &ApplyOutcome,
) -> CoreResult<Vec<VersionNotice>> {
    let mut notices = Vec::with_capacity(applied.changed.len());
    for pointer in &applied.changed {
        if let Some(version) = applied.new_map.version_of(pointer) {
            notices.push(VersionNotice::updated(pointer.clone(), version));
        } else if let Some(version) = original.version_of(pointer) {
            let deleted_at = version.checked_add(1).ok_or_else(|| {
                CoreError::internal(format!("{pointer}: version {version} cannot advance"))
            })?;
            notices.push(VersionNotice::deleted(pointer.clone(), deleted_at));
        }
    }
    Ok(notices)
}

/// Checks operation targets against the loaded snapshot, in order.
///
/// `update`/`delete` need an existing record; `create` on a record that
/// exists but that the caller never saw is a conflict.
fn validate_targets(original: &RecordMap, operations: &[WriteOperation]) -> CoreResult<()> {
    let mut present: HashSet<RecordPointer> = original.pointers().into_iter().collect();
    let mut existing_creates = Vec::new();

    for operation in operations {
        let pointer = operation.pointer();
        match operation {
            WriteOperation::Create { .. } => {
                if original.contains(&pointer) && present.contains(&pointer) {
                    existing_creates.push(pointer);
                } else if present.contains(&pointer) {
                    return Err(CoreError::invalid_operation(format!(
                        "{pointer}: created twice in one transaction"
                    )));
                } else {
                    present.insert(pointer);
                }
            }
            WriteOperation::Update { .. } => {
                if !present.contains(&pointer) {
                    return Err(CoreError::RecordNotFound { pointer });
                }
            }
            WriteOperation::Delete { .. } => {
                if !present.remove(&pointer) {
                    return Err(CoreError::RecordNotFound { pointer });
                }
            }
        }
    }

    if existing_creates.is_empty() {
        Ok(())
    } else {
        Err(CoreError::version_conflict(existing_creates, ConflictStage::Load))
    }
}

fn log_failure(err: &CoreError) {
    match err {
        CoreError::VersionConflict { pointers, stage } => {
            let records: Vec<String> = pointers.iter().map(ToString::to_string).collect();
            warn!(stage = %WriteStage::Failed, conflict_stage = %stage, ?records, "write conflict");
        }
        err if err.is_client_error() => {
            debug!(stage = %WriteStage::Failed, error = %err, "write rejected");
        }
        err => {
            error!(stage = %WriteStage::Failed, error = ?err, "write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::MergeApplier;
    use crate::publisher::BroadcastSink;
    use recsync_storage::{MemoryStore, RowSource};
    use serde_json::{json, Map, Value};

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn w(id: &str) -> RecordPointer {
        RecordPointer::new("widgets", id)
    }

    fn setup() -> (Arc<MemoryStore>, WriteCoordinator) {
        let store = Arc::new(MemoryStore::with_tables(["widgets", "gadgets"]));
        let registry = TableRegistry::new()
            .with_table("widgets", None)
            .unwrap()
            .with_table("gadgets", None)
            .unwrap()
            .into_shared();
        let coordinator =
            WriteCoordinator::new(store.clone(), registry, Arc::new(MergeApplier::new()));
        (store, coordinator)
    }

    fn txn(ops: Vec<WriteOperation>) -> WriteTransaction {
        WriteTransaction::new("t", "u1", ops)
    }

    #[test]
    fn create_then_update() {
        let (store, coordinator) = setup();

        let outcome = coordinator
            .execute(&txn(vec![WriteOperation::create(
                "widgets",
                "w1",
                data(json!({ "name": "A" })),
            )]))
            .unwrap();
        assert_eq!(
            serde_json::to_value(&outcome.record_map).unwrap(),
            json!({ "widgets": { "w1": { "id": "w1", "name": "A", "version": 1 } } })
        );
        assert_eq!(outcome.modified_records, vec![w("w1")]);

        let outcome = coordinator
            .execute(&txn(vec![WriteOperation::update(
                "widgets",
                "w1",
                data(json!({ "name": "B" })),
            )]))
            .unwrap();
        let record = outcome.record_map.get(&w("w1")).unwrap();
        assert_eq!(record.version, 2);
        assert_eq!(record.get("name"), Some(&json!("B")));

        let rows = store.select_by_ids("widgets", &["w1".to_string()]).unwrap();
        assert_eq!(rows[0].version, 2);
    }

    #[test]
    fn delete_is_reported_but_absent_from_map() {
        let (store, coordinator) = setup();
        coordinator
            .execute(&txn(vec![WriteOperation::create("widgets", "w1", Map::new())]))
            .unwrap();

        let outcome = coordinator
            .execute(&txn(vec![WriteOperation::delete("widgets", "w1")]))
            .unwrap();
        assert!(outcome.record_map.is_empty());
        assert_eq!(outcome.modified_records, vec![w("w1")]);
        assert_eq!(store.row_count("widgets"), 0);
    }

    #[test]
    fn unregistered_table_is_rejected() {
        let (store, coordinator) = setup();
        let result = coordinator.execute(&txn(vec![
            WriteOperation::create("widgets", "w1", Map::new()),
            WriteOperation::create("secrets", "s1", Map::new()),
        ]));
        assert!(matches!(result, Err(CoreError::TableNotAllowed { .. })));
        assert_eq!(store.row_count("widgets"), 0);
    }

    #[test]
    fn missing_update_target_aborts_everything() {
        let (store, coordinator) = setup();
        let result = coordinator.execute(&txn(vec![
            WriteOperation::create("widgets", "w1", Map::new()),
            WriteOperation::update("gadgets", "g1", Map::new()),
        ]));
        assert!(matches!(
            result,
            Err(CoreError::RecordNotFound { pointer }) if pointer == RecordPointer::new("gadgets", "g1")
        ));
        assert_eq!(store.row_count("widgets"), 0);
    }

    #[test]
    fn create_on_existing_record_conflicts() {
        let (_store, coordinator) = setup();
        coordinator
            .execute(&txn(vec![WriteOperation::create("widgets", "w1", Map::new())]))
            .unwrap();

        let result = coordinator.execute(&txn(vec![WriteOperation::create(
            "widgets",
            "w1",
            Map::new(),
        )]));
        assert!(matches!(
            result,
            Err(CoreError::VersionConflict { stage: ConflictStage::Load, ref pointers })
                if pointers == &vec![w("w1")]
        ));
    }

    #[test]
    fn delete_then_create_replaces_record() {
        let (store, coordinator) = setup();
        coordinator
            .execute(&txn(vec![WriteOperation::create(
                "widgets",
                "w1",
                data(json!({ "name": "A", "color": "red" })),
            )]))
            .unwrap();

        let outcome = coordinator
            .execute(&txn(vec![
                WriteOperation::delete("widgets", "w1"),
                WriteOperation::create("widgets", "w1", data(json!({ "name": "B" }))),
            ]))
            .unwrap();

        let record = outcome.record_map.get(&w("w1")).unwrap();
        assert_eq!(record.version, 2);
        assert!(record.get("color").is_none());
        assert_eq!(store.rows("widgets")[0].version, 2);
    }

    #[test]
    fn empty_transaction_touches_nothing() {
        let (_store, coordinator) = setup();
        let outcome = coordinator.execute(&txn(Vec::new())).unwrap();
        assert!(outcome.modified_records.is_empty());
    }

    #[test]
    fn committed_writes_are_published() {
        let (_store, coordinator) = setup();
        let sink = Arc::new(BroadcastSink::new(16));
        let mut rx = sink.subscribe();
        let publisher = Arc::new(NotificationPublisher::start(sink).unwrap());
        let coordinator = coordinator.with_publisher(publisher.clone());

        coordinator
            .execute(&txn(vec![
                WriteOperation::create("widgets", "w1", Map::new()),
                WriteOperation::create("widgets", "w2", Map::new()),
            ]))
            .unwrap();
        coordinator
            .execute(&txn(vec![WriteOperation::delete("widgets", "w2")]))
            .unwrap();
        publisher.flush();

        assert_eq!(rx.try_recv().unwrap(), VersionNotice::updated(w("w1"), 1));
        assert_eq!(rx.try_recv().unwrap(), VersionNotice::updated(w("w2"), 1));
        assert_eq!(rx.try_recv().unwrap(), VersionNotice::deleted(w("w2"), 2));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn failed_writes_are_not_published() {
        let (_store, coordinator) = setup();
        let sink = Arc::new(BroadcastSink::new(16));
        let mut rx = sink.subscribe();
        let publisher = Arc::new(NotificationPublisher::start(sink).unwrap());
        let coordinator = coordinator.with_publisher(publisher.clone());

        let result = coordinator.execute(&txn(vec![WriteOperation::delete("widgets", "nope")]));
        assert!(result.is_err());
        publisher.flush();
        assert!(rx.try_recv().is_err());
    }

    fn seed_exhausted(store: &MemoryStore) {
        let mut txn = store.begin().unwrap();
        txn.insert("widgets", &recsync_storage::Row::new("w1", u64::MAX, Map::new()), 0)
            .unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn exhausted_version_fails_update_and_rolls_back() {
        let (store, coordinator) = setup();
        seed_exhausted(&store);

        let result = coordinator.execute(&txn(vec![
            WriteOperation::create("gadgets", "g1", Map::new()),
            WriteOperation::update("widgets", "w1", data(json!({ "name": "B" }))),
        ]));
        assert!(matches!(result, Err(CoreError::Internal { .. })));
        assert_eq!(store.row_count("gadgets"), 0);
        assert_eq!(store.rows("widgets")[0].version, u64::MAX);

        // The writer lock was released by the rollback.
        coordinator
            .execute(&txn(vec![WriteOperation::create("gadgets", "g2", Map::new())]))
            .unwrap();
    }

    #[test]
    fn exhausted_version_fails_delete_and_rolls_back() {
        let (store, coordinator) = setup();
        seed_exhausted(&store);

        let result = coordinator.execute(&txn(vec![WriteOperation::delete("widgets", "w1")]));
        assert!(matches!(result, Err(CoreError::Internal { .. })));
        assert_eq!(store.row_count("widgets"), 1);
    }

    #[test]
    fn kind_counts() {
        let counts = KindCounts::of(&[
            WriteOperation::create("widgets", "w1", Map::new()),
            WriteOperation::update("widgets", "w1", Map::new()),
            WriteOperation::create("widgets", "w2", Map::new()),
        ]);
        assert_eq!(
            counts,
            KindCounts {
                creates: 2,
                updates: 1,
                deletes: 0
            }
        );
    }

    #[test]
    fn validate_targets_rules() {
        let mut original = RecordMap::new();
        original.insert("widgets", crate::record::RealtimeRecord::new("w1", 1, Map::new()));

        // create after delete of an existing record is allowed
        assert!(validate_targets(
            &original,
            &[
                WriteOperation::delete("widgets", "w1"),
                WriteOperation::create("widgets", "w1", Map::new()),
            ]
        )
        .is_ok());

        // update after delete is not
        assert!(matches!(
            validate_targets(
                &original,
                &[
                    WriteOperation::delete("widgets", "w1"),
                    WriteOperation::update("widgets", "w1", Map::new()),
                ]
            ),
            Err(CoreError::RecordNotFound { .. })
        ));

        // double create of a new record is invalid
        assert!(matches!(
            validate_targets(
                &original,
                &[
                    WriteOperation::create("widgets", "w2", Map::new()),
                    WriteOperation::create("widgets", "w2", Map::new()),
                ]
            ),
            Err(CoreError::InvalidOperation { .. })
        ));
    }
}
