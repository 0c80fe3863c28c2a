//! Main sync server.

use crate::auth::{AuthConfig, Caller, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::protocol::{
    ErrorResponse, GetRecordsRequest, GetRecordsResponse, RequestMessage, ResponseMessage,
    WriteRequest, WriteResponse,
};
use recsync_core::{
    BroadcastSink, MergeApplier, NotificationPublisher, NotificationSink, OperationApplier,
    PublisherStats, TableRegistry, VersionNotice, WriteCoordinator,
};
use recsync_storage::RecordStore;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// The sync server.
///
/// Composition root for the engine: builds the table registry from
/// configuration, wires the coordinator to the store and the notification
/// publisher, and exposes the read and write endpoints. Transports call
/// [`handle_get_records`](Self::handle_get_records) and
/// [`handle_write`](Self::handle_write) with the caller they
/// authenticated, or [`authenticate`](Self::authenticate) a token first.
///
/// # Example
///
/// ```
/// use recsync_server::{Caller, GetRecordsRequest, ServerConfig, SyncServer};
/// use recsync_storage::MemoryStore;
/// use std::sync::Arc;
///
/// let config = ServerConfig::new().with_table("widgets");
/// let store = Arc::new(MemoryStore::with_tables(["widgets"]));
/// let server = SyncServer::new(config, store).unwrap();
///
/// let caller = Caller::new("u1");
/// let response = server
///     .handle_get_records(Some(&caller), GetRecordsRequest::new(Vec::new()))
///     .unwrap();
/// assert!(response.record_map.is_empty());
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
    publisher: Arc<NotificationPublisher>,
    broadcast: Option<BroadcastSink>,
    validator: Option<TokenValidator>,
}

impl SyncServer {
    /// Creates a server with the merge applier and in-process broadcast
    /// notifications.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ServerConfig, store: Arc<dyn RecordStore>) -> ServerResult<Self> {
        let sink = BroadcastSink::new(config.notification_channel_capacity);
        let mut server = Self::with_components(
            config,
            store,
            Arc::new(MergeApplier::new()),
            Arc::new(sink.clone()),
        )?;
        server.broadcast = Some(sink);
        Ok(server)
    }

    /// Creates a server with a custom applier and notification sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the publisher
    /// cannot start.
    pub fn with_components(
        config: ServerConfig,
        store: Arc<dyn RecordStore>,
        applier: Arc<dyn OperationApplier>,
        sink: Arc<dyn NotificationSink>,
    ) -> ServerResult<Self> {
        config.validate()?;
        let registry = config.build_registry()?;

        let validator = match (&config.auth_secret, config.require_auth) {
            (Some(secret), true) => Some(TokenValidator::new(
                AuthConfig::new(secret.as_bytes().to_vec()).with_expiry(config.token_expiry()),
            )),
            _ => None,
        };

        let publisher = Arc::new(NotificationPublisher::start(sink)?);
        let coordinator = WriteCoordinator::new(Arc::clone(&store), Arc::clone(&registry), applier)
            .with_publisher(Arc::clone(&publisher));

        let context = Arc::new(HandlerContext::new(&config, store, registry, coordinator));
        let handler = RequestHandler::new(Arc::clone(&context));

        info!(
            tables = ?context.registry.tables(),
            auth = validator.is_some(),
            "sync server ready"
        );

        Ok(Self {
            handler,
            context,
            publisher,
            broadcast: None,
            validator,
        })
    }

    /// Authenticates a caller token.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Unauthenticated`] if the token is invalid or
    /// authentication is not enabled.
    pub fn authenticate(&self, token: &[u8]) -> ServerResult<Caller> {
        match &self.validator {
            Some(validator) => validator.validate(token),
            None => Err(ServerError::Unauthenticated(
                "token authentication is not enabled".into(),
            )),
        }
    }

    /// Issues a token for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication is not enabled or the user id is
    /// invalid.
    pub fn issue_token(&self, user_id: &str) -> ServerResult<Vec<u8>> {
        match &self.validator {
            Some(validator) => validator.create_token(user_id),
            None => Err(ServerError::Config(
                "token authentication is not enabled".into(),
            )),
        }
    }

    /// Handles a read request.
    pub fn handle_get_records(
        &self,
        caller: Option<&Caller>,
        request: GetRecordsRequest,
    ) -> Result<GetRecordsResponse, ErrorResponse> {
        self.handler
            .handle_get_records(caller, request)
            .map_err(|e| reply(&e))
    }

    /// Handles a write request.
    pub fn handle_write(
        &self,
        caller: Option<&Caller>,
        request: WriteRequest,
    ) -> Result<WriteResponse, ErrorResponse> {
        self.handler
            .handle_write(caller, request)
            .map_err(|e| reply(&e))
    }

    /// Handles a request envelope (dispatches to the matching handler).
    pub fn handle_message(&self, caller: Option<&Caller>, message: RequestMessage) -> ResponseMessage {
        let result = match message {
            RequestMessage::GetRecords(req) => self
                .handle_get_records(caller, req)
                .map(ResponseMessage::GetRecords),
            RequestMessage::Write(req) => self.handle_write(caller, req).map(ResponseMessage::Write),
        };
        result.unwrap_or_else(ResponseMessage::Error)
    }

    /// Subscribes to version notices, if the server owns the broadcast sink.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<VersionNotice>> {
        self.broadcast.as_ref().map(BroadcastSink::subscribe)
    }

    /// Blocks until every notice scheduled so far was handed to the sink.
    ///
    /// May be called from async code: it does not need a runtime and
    /// blocks only the calling thread. After [`shutdown`](Self::shutdown)
    /// it returns immediately.
    pub fn flush_notifications(&self) {
        self.publisher.flush();
    }

    /// Returns notification delivery counters.
    pub fn publisher_stats(&self) -> PublisherStats {
        self.publisher.stats()
    }

    /// Returns the table registry.
    pub fn registry(&self) -> &TableRegistry {
        &self.context.registry
    }

    /// Delivers pending notices and stops the publisher.
    pub fn shutdown(&self) {
        self.publisher.shutdown();
    }
}

impl std::fmt::Debug for SyncServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServer")
            .field("tables", &self.context.registry.tables())
            .field("auth", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}

/// Logs a failed request and converts it to the caller-facing reply.
fn reply(err: &ServerError) -> ErrorResponse {
    if err.is_server_error() {
        error!(error = ?err, "request failed");
    } else {
        warn!(code = %err.code(), error = %err, "request rejected");
    }
    err.to_response()
}
