//! Integration tests for the sync server over the full engine.

use proptest::prelude::*;
use recsync_core::{
    CoreError, MergeApplier, NotificationSink, OperationApplier, RecordMap, RecordPointer,
    WriteOperation, WriteTransaction,
};
use recsync_server::{
    Caller, ErrorCode, ErrorResponse, GetRecordsRequest, ServerConfig, SyncServer, WriteResponse,
};
use recsync_testkit::{
    create_batch_strategy, fields_strategy, object, pointer_strategy, FailingSink,
    InstrumentedStore, InterferingApplier, PropTestConfig, RecordingSink, TestHarness,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::thread;

struct Fixture {
    server: Arc<SyncServer>,
    store: Arc<InstrumentedStore>,
    sink: Arc<RecordingSink>,
}

fn fixture_with(applier: Arc<dyn OperationApplier>) -> Fixture {
    let store = Arc::new(InstrumentedStore::with_tables(["widgets", "gadgets"]));
    let sink = Arc::new(RecordingSink::new());
    let config = ServerConfig::new().with_table("widgets").with_table("gadgets");
    let server = SyncServer::with_components(config, store.clone(), applier, sink.clone())
        .expect("Failed to start server");
    Fixture {
        server: Arc::new(server),
        store,
        sink,
    }
}

fn fixture() -> Fixture {
    fixture_with(Arc::new(MergeApplier::new()))
}

fn u1() -> Caller {
    Caller::new("u1")
}

fn w(id: &str) -> RecordPointer {
    RecordPointer::new("widgets", id)
}

fn write(server: &SyncServer, operations: Vec<WriteOperation>) -> Result<WriteResponse, ErrorResponse> {
    server.handle_write(Some(&u1()), WriteTransaction::new("txn", "u1", operations))
}

fn read(server: &SyncServer, pointers: Vec<RecordPointer>) -> RecordMap {
    server
        .handle_get_records(Some(&u1()), GetRecordsRequest::new(pointers))
        .expect("read failed")
        .record_map
}

fn update_name(id: &str, name: &str) -> WriteOperation {
    WriteOperation::update("widgets", id, object(json!({ "name": name })))
}

// ============================================================================
// End-to-end
// ============================================================================

#[test]
fn widgets_end_to_end() {
    let applier = Arc::new(InterferingApplier::new());
    let f = fixture_with(applier.clone());

    // create
    let created = write(
        &f.server,
        vec![WriteOperation::create("widgets", "w1", object(json!({ "name": "A" })))],
    )
    .unwrap();
    assert_eq!(
        serde_json::to_value(&created.record_map).unwrap()["widgets"]["w1"],
        json!({ "id": "w1", "name": "A", "version": 1 })
    );

    // A racing batch loads w1 at version 1; the update to "B" commits
    // while it is in flight.
    let second = Arc::new(slot());
    {
        let server = Arc::clone(&f.server);
        let second = Arc::clone(&second);
        applier.before_next_apply(move || {
            let response = write(&server, vec![update_name("w1", "B")]);
            second.set(response);
        });
    }
    let racing = write(&f.server, vec![update_name("w1", "C")]).unwrap_err();

    let updated = second.take().unwrap();
    let record = updated.record_map.get(&w("w1")).unwrap();
    assert_eq!(record.version, 2);
    assert_eq!(record.get("name"), Some(&json!("B")));

    assert_eq!(racing.code, ErrorCode::Conflict);
    assert_eq!(racing.conflicting_records, vec![w("w1")]);

    let current = read(&f.server, vec![w("w1")]);
    assert_eq!(current.get(&w("w1")).unwrap().get("name"), Some(&json!("B")));
}

/// One-value slot filled from inside a hook.
fn slot() -> Slot {
    Slot(std::sync::Mutex::new(None))
}

struct Slot(std::sync::Mutex<Option<Result<WriteResponse, ErrorResponse>>>);

impl Slot {
    fn set(&self, value: Result<WriteResponse, ErrorResponse>) {
        *self.0.lock().unwrap() = Some(value);
    }

    fn take(&self) -> Result<WriteResponse, ErrorResponse> {
        self.0.lock().unwrap().take().expect("hook did not run")
    }
}

// ============================================================================
// Conflicts
// ============================================================================

#[test]
fn conflict_at_save_rolls_back_everything() {
    let f = fixture();
    write(
        &f.server,
        vec![WriteOperation::create("widgets", "w1", object(json!({ "name": "A" })))],
    )
    .unwrap();

    // Another writer commits w1 -> v2 right before this batch's first write.
    {
        let server = Arc::clone(&f.server);
        f.store.before_first_write(move || {
            write(&server, vec![update_name("w1", "other")]).unwrap();
        });
    }

    let err = write(
        &f.server,
        vec![
            WriteOperation::create("gadgets", "g1", object(json!({ "size": 3 }))),
            update_name("w1", "mine"),
        ],
    )
    .unwrap_err();

    assert_eq!(err.code, ErrorCode::Conflict);
    assert_eq!(err.conflicting_records, vec![w("w1")]);

    let after = read(&f.server, vec![w("w1"), RecordPointer::new("gadgets", "g1")]);
    assert_eq!(after.len(), 1);
    let record = after.get(&w("w1")).unwrap();
    assert_eq!(record.version, 2);
    assert_eq!(record.get("name"), Some(&json!("other")));
}

#[test]
fn conflict_at_reconcile_on_concurrent_delete() {
    let applier = Arc::new(InterferingApplier::new());
    let f = fixture_with(applier.clone());
    write(&f.server, vec![WriteOperation::create("widgets", "w1", Default::default())]).unwrap();

    {
        let server = Arc::clone(&f.server);
        applier.before_next_apply(move || {
            write(&server, vec![WriteOperation::delete("widgets", "w1")]).unwrap();
        });
    }

    let err = write(&f.server, vec![update_name("w1", "late")]).unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);
    assert!(read(&f.server, vec![w("w1")]).is_empty());
}

#[test]
fn create_on_existing_record_is_a_conflict() {
    let f = fixture();
    write(&f.server, vec![WriteOperation::create("widgets", "w1", Default::default())]).unwrap();

    let err = write(&f.server, vec![WriteOperation::create("widgets", "w1", Default::default())])
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);
    assert_eq!(err.conflicting_records, vec![w("w1")]);
}

#[test]
fn concurrent_writers_on_one_record() {
    let f = fixture();
    write(
        &f.server,
        vec![WriteOperation::create("widgets", "w1", object(json!({ "n": 0 })))],
    )
    .unwrap();

    let handles: Vec<_> = (1..=8)
        .map(|n| {
            let server = Arc::clone(&f.server);
            thread::spawn(move || {
                let op = WriteOperation::update("widgets", "w1", object(json!({ "n": n })));
                write(&server, vec![op])
            })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => succeeded += 1,
            Err(err) => assert_eq!(err.code, ErrorCode::Conflict),
        }
    }

    assert!(succeeded >= 1);
    let record = read(&f.server, vec![w("w1")]).get(&w("w1")).cloned().unwrap();
    assert_eq!(record.version, 1 + succeeded);
}

#[test]
fn disjoint_writers_all_commit() {
    let f = fixture();

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let server = Arc::clone(&f.server);
            thread::spawn(move || {
                let op = WriteOperation::create("widgets", format!("w{n}"), Default::default());
                write(&server, vec![op])
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }

    let pointers: Vec<_> = (0..8).map(|n| w(&format!("w{n}"))).collect();
    assert_eq!(read(&f.server, pointers).len(), 8);
}

#[test]
fn commit_failure_is_an_opaque_internal_error() {
    let f = fixture();
    f.store.fail_next_commit();

    let err = write(
        &f.server,
        vec![WriteOperation::create("widgets", "w1", object(json!({ "name": "A" })))],
    )
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::InternalError);
    assert_eq!(err.message, "internal error");
    assert!(err.conflicting_records.is_empty());

    f.server.flush_notifications();
    assert!(read(&f.server, vec![w("w1")]).is_empty());
    assert!(f.sink.notices().is_empty());

    // The store recovers for the next write.
    write(&f.server, vec![WriteOperation::create("widgets", "w1", Default::default())]).unwrap();
}

// ============================================================================
// Engine without the server layer
// ============================================================================

#[test]
fn immutable_fields_reject_the_whole_batch() {
    let applier = MergeApplier::new().with_immutable_field("widgets", "sku");
    let harness = TestHarness::with_applier(&["widgets", "gadgets"], Arc::new(applier));
    assert_eq!(harness.seed("widgets", "w1", json!({ "sku": "S1", "name": "A" })), 1);
    harness.store.reset_stats();

    let result = harness.write(vec![
        WriteOperation::create("gadgets", "g1", Default::default()),
        WriteOperation::update("widgets", "w1", object(json!({ "sku": "S2" }))),
    ]);
    assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    assert_eq!(harness.store.stats().writes, 0);
    assert_eq!(harness.store.stats().rollbacks, 1);

    let outcome = harness
        .write(vec![WriteOperation::update("widgets", "w1", object(json!({ "name": "B" })))])
        .unwrap();
    assert_eq!(outcome.record_map.version_of(&w("w1")), Some(2));

    harness.flush();
    assert_eq!(harness.sink.keys(), vec!["widgets:w1", "widgets:w1"]);
    let current = harness.read(&[w("w1"), RecordPointer::new("gadgets", "g1")]).unwrap();
    assert_eq!(current.len(), 1);
}

// ============================================================================
// Gating
// ============================================================================

#[test]
fn unregistered_table_never_reaches_storage() {
    let f = fixture();

    let err = f
        .server
        .handle_get_records(
            Some(&u1()),
            GetRecordsRequest::new(vec![w("w1"), RecordPointer::new("users", "u1")]),
        )
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::BadRequest);

    let err = write(
        &f.server,
        vec![
            WriteOperation::create("widgets", "w1", Default::default()),
            WriteOperation::update("users", "u1", object(json!({ "admin": true }))),
        ],
    )
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::BadRequest);

    assert_eq!(f.store.stats().total(), 0);
}

#[test]
fn author_mismatch_writes_nothing() {
    let f = fixture();

    let err = f
        .server
        .handle_write(
            Some(&u1()),
            WriteTransaction::new(
                "t1",
                "u2",
                vec![WriteOperation::create("widgets", "w1", Default::default())],
            ),
        )
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Forbidden);

    let err = f
        .server
        .handle_write(
            None,
            WriteTransaction::new(
                "t1",
                "u1",
                vec![WriteOperation::create("widgets", "w1", Default::default())],
            ),
        )
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Forbidden);

    assert_eq!(f.store.stats().writes, 0);
    assert_eq!(f.store.stats().begins, 0);
}

#[test]
fn missing_target_is_bad_request_and_rolled_back() {
    let f = fixture();
    let err = write(
        &f.server,
        vec![
            WriteOperation::create("widgets", "w1", Default::default()),
            WriteOperation::delete("widgets", "ghost"),
        ],
    )
    .unwrap_err();

    assert_eq!(err.code, ErrorCode::BadRequest);
    assert!(read(&f.server, vec![w("w1")]).is_empty());
    assert_eq!(f.store.stats().writes, 0);
}

// ============================================================================
// Notifications
// ============================================================================

#[test]
fn notices_follow_commits() {
    let f = fixture();
    write(
        &f.server,
        vec![
            WriteOperation::create("widgets", "w1", Default::default()),
            WriteOperation::create("gadgets", "g1", Default::default()),
        ],
    )
    .unwrap();
    write(&f.server, vec![WriteOperation::delete("widgets", "w1")]).unwrap();
    write(&f.server, vec![WriteOperation::delete("widgets", "w1")]).unwrap_err();
    f.server.flush_notifications();

    let notices = f.sink.notices();
    let summary: Vec<(String, u64, bool)> = notices
        .iter()
        .map(|n| (n.key.clone(), n.version, n.deleted))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("widgets:w1".to_string(), 1, false),
            ("gadgets:g1".to_string(), 1, false),
            ("widgets:w1".to_string(), 2, true),
        ]
    );
}

#[test]
fn publish_failures_do_not_fail_writes() {
    let store = Arc::new(InstrumentedStore::with_tables(["widgets"]));
    let sink = Arc::new(FailingSink::new());
    let server = SyncServer::with_components(
        ServerConfig::new().with_table("widgets"),
        store,
        Arc::new(MergeApplier::new()),
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
    )
    .unwrap();

    let response = write(&server, vec![WriteOperation::create("widgets", "w1", Default::default())]);
    assert!(response.is_ok());

    server.flush_notifications();
    assert_eq!(sink.attempts(), 1);
    assert_eq!(server.publisher_stats().failed, 1);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn created_records_start_at_version_one(ops in create_batch_strategy("widgets", 6)) {
        let f = fixture();
        let pointers: Vec<RecordPointer> = ops.iter().map(WriteOperation::pointer).collect();

        let response = write(&f.server, ops).unwrap();
        prop_assert_eq!(&response.modified_records, &pointers);

        let stored = read(&f.server, pointers.clone());
        for pointer in &pointers {
            prop_assert_eq!(stored.version_of(pointer), Some(1));
        }
    }

    #[test]
    fn updates_bump_version_and_keep_untouched_fields(
        base in fields_strategy(),
        patch in fields_strategy(),
        bumps in 0usize..4,
    ) {
        let f = fixture();
        write(&f.server, vec![WriteOperation::create("widgets", "w1", base.clone())]).unwrap();
        for _ in 0..bumps {
            write(&f.server, vec![WriteOperation::update("widgets", "w1", Default::default())]).unwrap();
        }

        let response = write(&f.server, vec![WriteOperation::update("widgets", "w1", patch.clone())]).unwrap();
        let record = response.record_map.get(&w("w1")).unwrap();
        prop_assert_eq!(record.version, bumps as u64 + 2);

        for (field, value) in &base {
            let expected: &Value = patch.get(field).unwrap_or(value);
            prop_assert_eq!(record.get(field), Some(expected));
        }
    }

    #[test]
    fn reads_are_idempotent(
        ops in create_batch_strategy("widgets", 6),
        extra in pointer_strategy("widgets"),
    ) {
        let f = fixture();
        let mut pointers: Vec<RecordPointer> = ops.iter().map(WriteOperation::pointer).collect();
        pointers.push(extra);
        write(&f.server, ops).unwrap();

        let first = read(&f.server, pointers.clone());
        let second = read(&f.server, pointers);
        prop_assert_eq!(first, second);
    }
}
