//! # recsync Storage
//!
//! Generic record store interface and implementations for recsync.
//!
//! The sync engine never talks to a concrete database. It reaches the
//! backing relational store through three small traits:
//!
//! - [`RowSource`] - batched `SELECT ... WHERE id IN (...)`
//! - [`RecordStore`] - committed reads plus `begin()`
//! - [`StoreTransaction`] - insert and version-guarded update/delete,
//!   committed or rolled back atomically
//!
//! ## Design Principles
//!
//! - Stores address **physical** table names; logical-name allowlisting
//!   happens above this crate
//! - The `version` column is first-class so stores can evaluate the
//!   optimistic-lock predicate themselves
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - For testing, the CLI and ephemeral deployments

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod error;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use store::{RecordStore, Row, RowSource, StoreTransaction};
