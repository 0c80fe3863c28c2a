//! Conflict detection between load and save.

use crate::error::CoreResult;
use crate::loader::RecordLoader;
use crate::record::{RecordMap, RecordPointer};
use recsync_storage::RowSource;
use tracing::debug;

/// Detects records modified by another writer since they were loaded.
///
/// Only the records this write is about to mutate are reloaded and
/// compared. A record that was read but not written is not checked, so
/// the guarantee is write-write conflict freedom, not serializability.
#[derive(Debug, Clone, Copy)]
pub struct ConflictDetector<'r> {
    loader: RecordLoader<'r>,
}

impl<'r> ConflictDetector<'r> {
    /// Creates a detector that reloads through `loader`.
    pub fn new(loader: RecordLoader<'r>) -> Self {
        Self { loader }
    }

    /// Returns the pointers whose current version differs from `original`.
    ///
    /// A record that appeared or disappeared since the load counts as a
    /// conflict too. An empty result means no conflict.
    ///
    /// # Errors
    ///
    /// Returns an error if reloading fails.
    pub fn detect<S>(
        &self,
        source: &S,
        original: &RecordMap,
        changed: &[RecordPointer],
    ) -> CoreResult<Vec<RecordPointer>>
    where
        S: RowSource + ?Sized,
    {
        if changed.is_empty() {
            return Ok(Vec::new());
        }

        let current = self.loader.load(source, changed)?;

        let conflicts: Vec<RecordPointer> = changed
            .iter()
            .filter(|pointer| current.version_of(pointer) != original.version_of(pointer))
            .cloned()
            .collect();

        if !conflicts.is_empty() {
            debug!(
                checked = changed.len(),
                conflicts = conflicts.len(),
                "version mismatch on reload"
            );
        }
        Ok(conflicts)
    }
}
