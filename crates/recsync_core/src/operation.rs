//! Write operations and write transactions.

use crate::record::RecordPointer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Kind of write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Record is created.
    Create,
    /// Record fields are merged.
    Update,
    /// Record is removed.
    Delete,
}

/// A single mutation of one record.
///
/// On the wire: `{"type": "create" | "update" | "delete", "table", "id", "data"?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WriteOperation {
    /// Creates a record from its full initial data.
    Create {
        /// Logical table name.
        table: String,
        /// Record id.
        id: String,
        /// Initial fields.
        data: Map<String, Value>,
    },
    /// Merges the given fields into an existing record.
    Update {
        /// Logical table name.
        table: String,
        /// Record id.
        id: String,
        /// Fields to overwrite; absent fields keep their value.
        data: Map<String, Value>,
    },
    /// Deletes an existing record.
    Delete {
        /// Logical table name.
        table: String,
        /// Record id.
        id: String,
    },
}

impl WriteOperation {
    /// Creates a `create` operation.
    pub fn create(table: impl Into<String>, id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self::Create {
            table: table.into(),
            id: id.into(),
            data,
        }
    }

    /// Creates an `update` operation.
    pub fn update(table: impl Into<String>, id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self::Update {
            table: table.into(),
            id: id.into(),
            data,
        }
    }

    /// Creates a `delete` operation.
    pub fn delete(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Delete {
            table: table.into(),
            id: id.into(),
        }
    }

    /// Returns the operation kind.
    pub fn kind(&self) -> OperationKind {
        match self {
            WriteOperation::Create { .. } => OperationKind::Create,
            WriteOperation::Update { .. } => OperationKind::Update,
            WriteOperation::Delete { .. } => OperationKind::Delete,
        }
    }

    /// Returns the target table.
    pub fn table(&self) -> &str {
        match self {
            WriteOperation::Create { table, .. }
            | WriteOperation::Update { table, .. }
            | WriteOperation::Delete { table, .. } => table,
        }
    }

    /// Returns the target record id.
    pub fn id(&self) -> &str {
        match self {
            WriteOperation::Create { id, .. }
            | WriteOperation::Update { id, .. }
            | WriteOperation::Delete { id, .. } => id,
        }
    }

    /// Returns a pointer to the target record.
    pub fn pointer(&self) -> RecordPointer {
        RecordPointer::new(self.table(), self.id())
    }
}

/// Returns the distinct pointers referenced by `operations`, in first-use order.
pub fn referenced_pointers(operations: &[WriteOperation]) -> Vec<RecordPointer> {
    let mut seen = HashSet::new();
    operations
        .iter()
        .map(WriteOperation::pointer)
        .filter(|pointer| seen.insert(pointer.clone()))
        .collect()
}

/// A batch of operations submitted by one author.
///
/// `author_id` must equal the authenticated caller; the request handler
/// enforces that before the batch reaches the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteTransaction {
    /// Client-chosen id, used for logging and idempotency on the caller side.
    pub transaction_id: String,
    /// User that submitted the batch.
    pub author_id: String,
    /// Operations, applied in order.
    pub operations: Vec<WriteOperation>,
}

impl WriteTransaction {
    /// Creates a new write transaction.
    pub fn new(
        transaction_id: impl Into<String>,
        author_id: impl Into<String>,
        operations: Vec<WriteOperation>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            author_id: author_id.into(),
            operations,
        }
    }
}
