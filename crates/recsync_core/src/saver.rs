//! Persisting changed records with version-guarded statements.

use crate::error::{ConflictStage, CoreError, CoreResult};
use crate::record::{RecordMap, RecordPointer};
use crate::registry::TableRegistry;
use recsync_storage::{StorageError, StoreTransaction};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

/// Counts of statements a save executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveSummary {
    /// Rows inserted.
    pub inserted: usize,
    /// Rows updated.
    pub updated: usize,
    /// Rows deleted.
    pub deleted: usize,
}

/// Writes the new state of changed records inside a storage transaction.
///
/// Per changed pointer, compared to the originally loaded snapshot:
///
/// | original | new | statement |
/// |---|---|---|
/// | absent | present | `INSERT` (version must be 1) |
/// | present | present | `UPDATE .. WHERE version = original` (new = original + 1) |
/// | present | absent | `DELETE .. WHERE version = original` |
///
/// A guarded statement that affects no row means another writer got in
/// between the conflict check and this statement; it is reported as
/// [`CoreError::VersionConflict`] at [`ConflictStage::Save`].
#[derive(Debug, Clone, Copy)]
pub struct RecordSaver<'r> {
    registry: &'r TableRegistry,
}

impl<'r> RecordSaver<'r> {
    /// Creates a saver bound to a registry.
    pub fn new(registry: &'r TableRegistry) -> Self {
        Self { registry }
    }

    /// Saves every pointer in `changed`.
    ///
    /// The caller owns `txn` and decides whether to commit or roll back.
    ///
    /// # Errors
    ///
    /// Returns a version conflict on a lost race, [`CoreError::Internal`] if
    /// the new state breaks the versioning contract, or a storage error.
    pub fn save<T>(
        &self,
        txn: &mut T,
        original: &RecordMap,
        new_map: &RecordMap,
        changed: &[RecordPointer],
    ) -> CoreResult<SaveSummary>
    where
        T: StoreTransaction + ?Sized,
    {
        let now = now_millis();
        let mut summary = SaveSummary::default();

        for pointer in changed {
            let physical = self.registry.ensure_allowed(&pointer.table)?;

            match (original.get(pointer), new_map.get(pointer)) {
                (None, Some(record)) => {
                    if record.version != 1 {
                        return Err(CoreError::internal(format!(
                            "{pointer}: new record has version {}",
                            record.version
                        )));
                    }
                    match txn.insert(physical, &record.to_row(), now) {
                        Ok(()) => summary.inserted += 1,
                        Err(StorageError::DuplicateKey { .. }) => {
                            return Err(lost_race(pointer));
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                (Some(before), Some(record)) => {
                    if before.version.checked_add(1) != Some(record.version) {
                        return Err(CoreError::internal(format!(
                            "{pointer}: version {} does not follow {}",
                            record.version, before.version
                        )));
                    }
                    let affected =
                        txn.update_where_version(physical, &record.to_row(), before.version, now)?;
                    if affected == 0 {
                        return Err(lost_race(pointer));
                    }
                    summary.updated += 1;
                }
                (Some(before), None) => {
                    let affected = txn.delete_where_version(physical, &pointer.id, before.version)?;
                    if affected == 0 {
                        return Err(lost_race(pointer));
                    }
                    summary.deleted += 1;
                }
                (None, None) => {
                    trace!(%pointer, "nothing to save");
                }
            }
        }

        debug!(
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            "saved records"
        );
        Ok(summary)
    }
}

fn lost_race(pointer: &RecordPointer) -> CoreError {
    CoreError::version_conflict(vec![pointer.clone()], ConflictStage::Save)
}

/// Milliseconds since the Unix epoch, used for the `updated_at` marker.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
