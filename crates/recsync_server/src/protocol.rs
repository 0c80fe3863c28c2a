//! Request and response messages for the read and write endpoints.
//!
//! All messages serialize as camelCase JSON so transports can pass them
//! through unchanged.

use recsync_core::{RecordMap, RecordPointer, WriteOutcome, WriteTransaction};
use serde::{Deserialize, Serialize};

/// Error class returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed request, unregistered table or missing record.
    BadRequest,
    /// Caller is unauthenticated or not allowed to act as the author.
    Forbidden,
    /// Optimistic-lock violation. Reload and retry.
    Conflict,
    /// Unexpected failure.
    InternalError,
}

impl ErrorCode {
    /// Returns the wire name, e.g. `"BAD_REQUEST"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read request: the records to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRecordsRequest {
    /// Records to fetch. Missing records are simply absent from the reply.
    pub pointers: Vec<RecordPointer>,
}

impl GetRecordsRequest {
    /// Creates a read request.
    pub fn new(pointers: Vec<RecordPointer>) -> Self {
        Self { pointers }
    }
}

/// Read response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRecordsResponse {
    /// Records found, keyed by table then id.
    pub record_map: RecordMap,
}

/// Write request: `{transactionId, authorId, operations}`.
pub type WriteRequest = WriteTransaction;

/// Write response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResponse {
    /// New state of the changed records. Deleted records are absent.
    pub record_map: RecordMap,
    /// Every record the write modified.
    pub modified_records: Vec<RecordPointer>,
}

impl From<WriteOutcome> for WriteResponse {
    fn from(outcome: WriteOutcome) -> Self {
        Self {
            record_map: outcome.record_map,
            modified_records: outcome.modified_records,
        }
    }
}

/// Error reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Error class.
    pub code: ErrorCode,
    /// Human-readable message. Opaque for internal errors.
    pub message: String,
    /// Records that caused a [`ErrorCode::Conflict`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicting_records: Vec<RecordPointer>,
}

impl ErrorResponse {
    /// Creates an error reply without conflicting records.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            conflicting_records: Vec::new(),
        }
    }
}

/// Envelope for transports that multiplex both endpoints on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "camelCase")]
pub enum RequestMessage {
    /// A read.
    GetRecords(GetRecordsRequest),
    /// A write.
    Write(WriteRequest),
}

/// Reply envelope matching [`RequestMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "camelCase")]
pub enum ResponseMessage {
    /// Reply to a read.
    GetRecords(GetRecordsResponse),
    /// Reply to a write.
    Write(WriteResponse),
    /// Any failure.
    Error(ErrorResponse),
}
