//! Request handlers for the read and write endpoints.
//!
//! Handlers gate every request on the authenticated caller and the
//! configured batch limits, then delegate to the engine. They hold no
//! per-request state.

use crate::auth::Caller;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::protocol::{GetRecordsRequest, GetRecordsResponse, WriteRequest, WriteResponse};
use recsync_core::{RecordLoader, TableRegistry, WriteCoordinator};
use recsync_storage::RecordStore;
use std::sync::Arc;
use tracing::debug;

/// Everything the handlers need, wired once at startup.
pub struct HandlerContext {
    /// Backing record store, used directly by the read path.
    pub store: Arc<dyn RecordStore>,
    /// Table allowlist.
    pub registry: Arc<TableRegistry>,
    /// Write pipeline.
    pub coordinator: WriteCoordinator,
    /// Maximum pointers per read.
    pub max_read_pointers: usize,
    /// Maximum operations per write.
    pub max_write_operations: usize,
}

impl HandlerContext {
    /// Creates a handler context.
    pub fn new(
        config: &ServerConfig,
        store: Arc<dyn RecordStore>,
        registry: Arc<TableRegistry>,
        coordinator: WriteCoordinator,
    ) -> Self {
        Self {
            store,
            registry,
            coordinator,
            max_read_pointers: config.max_read_pointers,
            max_write_operations: config.max_write_operations,
        }
    }
}

/// Handler for record sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles a read.
    ///
    /// No transaction and no locking: rows come from committed state.
    ///
    /// # Errors
    ///
    /// FORBIDDEN without a caller, BAD_REQUEST for too many pointers or an
    /// unregistered table (checked before storage is touched).
    pub fn handle_get_records(
        &self,
        caller: Option<&Caller>,
        request: GetRecordsRequest,
    ) -> ServerResult<GetRecordsResponse> {
        let caller = require_caller(caller)?;

        if request.pointers.len() > self.context.max_read_pointers {
            return Err(ServerError::InvalidRequest(format!(
                "too many pointers: {} > {}",
                request.pointers.len(),
                self.context.max_read_pointers
            )));
        }

        let record_map =
            RecordLoader::new(&self.context.registry).load(&*self.context.store, &request.pointers)?;
        debug!(
            user_id = caller.user_id(),
            requested = request.pointers.len(),
            found = record_map.len(),
            "served read"
        );

        Ok(GetRecordsResponse { record_map })
    }

    /// Handles a write.
    ///
    /// # Errors
    ///
    /// FORBIDDEN without a caller or when `authorId` is someone else,
    /// BAD_REQUEST for a malformed batch, otherwise whatever the
    /// coordinator reports.
    pub fn handle_write(
        &self,
        caller: Option<&Caller>,
        request: WriteRequest,
    ) -> ServerResult<WriteResponse> {
        let caller = require_caller(caller)?;

        if request.author_id != caller.user_id() {
            return Err(ServerError::AuthorMismatch {
                author: request.author_id,
                caller: caller.user_id().to_string(),
            });
        }
        if request.transaction_id.trim().is_empty() {
            return Err(ServerError::InvalidRequest(
                "transactionId must not be empty".into(),
            ));
        }
        if request.operations.len() > self.context.max_write_operations {
            return Err(ServerError::InvalidRequest(format!(
                "too many operations: {} > {}",
                request.operations.len(),
                self.context.max_write_operations
            )));
        }

        let outcome = self.context.coordinator.execute(&request)?;
        Ok(outcome.into())
    }
}

fn require_caller(caller: Option<&Caller>) -> ServerResult<&Caller> {
    caller.ok_or_else(|| ServerError::Unauthenticated("no authenticated caller".into()))
}
