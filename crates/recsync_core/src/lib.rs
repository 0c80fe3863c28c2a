//! # recsync Core
//!
//! Realtime record synchronization engine.
//!
//! Clients read records by pointer and submit batches of create, update
//! and delete operations. Every record carries a monotonically increasing
//! `version`; a write commits only if no record it mutates changed since
//! it was loaded, and every committed version is announced to subscribers.
//!
//! This crate provides:
//! - [`TableRegistry`] - allowlist of logical tables and their physical names
//! - [`RecordLoader`] - batched, one-query-per-table reads
//! - [`OperationApplier`] / [`MergeApplier`] - pure new-state computation
//! - [`ConflictDetector`] - write-write conflict checks before save
//! - [`RecordSaver`] - version-guarded persistence
//! - [`WriteCoordinator`] - the transactional write pipeline
//! - [`NotificationPublisher`] - post-commit version fan-out
//!
//! ## Concurrency model
//!
//! Optimistic: nothing is locked across requests. Two writers that race on
//! a record both pass their own load, and exactly one of them wins the
//! version-guarded save. The loser fails with
//! [`CoreError::VersionConflict`] and must reload and retry.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod applier;
mod conflict;
mod coordinator;
mod error;
mod loader;
mod operation;
mod publisher;
mod record;
mod registry;
mod saver;

pub use applier::{ApplyOutcome, MergeApplier, OperationApplier};
pub use conflict::ConflictDetector;
pub use coordinator::{WriteCoordinator, WriteOutcome, WriteStage};
pub use error::{ConflictStage, CoreError, CoreResult};
pub use loader::RecordLoader;
pub use operation::{referenced_pointers, OperationKind, WriteOperation, WriteTransaction};
pub use publisher::{
    BroadcastSink, NotificationPublisher, NotificationSink, PublishError, PublisherStats,
    VersionNotice,
};
pub use record::{RealtimeRecord, RecordMap, RecordPointer, ID_FIELD, VERSION_FIELD};
pub use registry::TableRegistry;
pub use saver::{RecordSaver, SaveSummary};
