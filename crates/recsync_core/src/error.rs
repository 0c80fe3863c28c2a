//! Error types for recsync core.

use crate::record::RecordPointer;
use std::fmt;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Step at which a version conflict was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStage {
    /// A `create` targeted a record that already exists.
    Load,
    /// Reloading changed records found a newer version than was loaded.
    Reconcile,
    /// A version-guarded statement affected no row.
    Save,
}

impl fmt::Display for ConflictStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictStage::Load => "load",
            ConflictStage::Reconcile => "reconcile",
            ConflictStage::Save => "save",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in recsync core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The table is not in the registry.
    #[error("table not allowed: {table}")]
    TableNotAllowed {
        /// The rejected logical table name.
        table: String,
    },

    /// An update or delete targeted a record that does not exist.
    #[error("record not found: {pointer}")]
    RecordNotFound {
        /// The missing record.
        pointer: RecordPointer,
    },

    /// Another transaction modified records this write depends on.
    #[error("version conflict at {stage} on {} record(s)", pointers.len())]
    VersionConflict {
        /// The conflicting records.
        pointers: Vec<RecordPointer>,
        /// Where the conflict was detected.
        stage: ConflictStage,
    },

    /// The operation payload violates the record contract.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the violation.
        message: String,
    },

    /// A table registration was rejected.
    #[error("invalid registration for table {table}: {reason}")]
    InvalidRegistration {
        /// Logical table name.
        table: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] recsync_storage::StorageError),

    /// Unexpected failure.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a table-not-allowed error.
    pub fn table_not_allowed(table: impl Into<String>) -> Self {
        Self::TableNotAllowed {
            table: table.into(),
        }
    }

    /// Creates a version conflict error.
    pub fn version_conflict(pointers: Vec<RecordPointer>, stage: ConflictStage) -> Self {
        Self::VersionConflict { pointers, stage }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a version conflict.
    ///
    /// Conflicts are the only errors callers are expected to recover from,
    /// by refetching and retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::VersionConflict { .. })
    }

    /// Returns the conflicting records, empty for other errors.
    pub fn conflicting_pointers(&self) -> &[RecordPointer] {
        match self {
            CoreError::VersionConflict { pointers, .. } => pointers,
            _ => &[],
        }
    }

    /// Returns true if the caller sent something invalid.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CoreError::TableNotAllowed { .. }
                | CoreError::RecordNotFound { .. }
                | CoreError::InvalidOperation { .. }
        )
    }
}
