//! # recsync Testkit
//!
//! Test utilities for recsync.
//!
//! This crate provides:
//! - A wired engine harness over an instrumented in-memory store
//! - A store wrapper that counts storage calls and injects competing writes
//! - Recording and failing notification sinks
//! - An applier that injects a competing write mid-transaction
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use recsync_testkit::prelude::*;
//!
//! #[test]
//! fn rejects_unknown_tables() {
//!     let harness = TestHarness::new(&["widgets"]);
//!     assert!(harness.write(vec![WriteOperation::delete("secrets", "s1")]).is_err());
//!     assert_eq!(harness.store.stats().total(), 0);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod appliers;
pub mod fixtures;
pub mod generators;
pub mod instrumented;
pub mod sinks;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::appliers::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::instrumented::*;
    pub use crate::sinks::*;
    pub use recsync_core::{RecordPointer, WriteOperation, WriteTransaction};
}

pub use appliers::*;
pub use fixtures::*;
pub use generators::*;
pub use instrumented::*;
pub use sinks::*;
