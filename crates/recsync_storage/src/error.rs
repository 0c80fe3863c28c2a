//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The physical table does not exist in the store.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// An insert collided with an existing primary key.
    #[error("duplicate key {id} in table {table}")]
    DuplicateKey {
        /// Physical table name.
        table: String,
        /// Conflicting row id.
        id: String,
    },

    /// Backend-specific failure (connection, driver, ...).
    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}
