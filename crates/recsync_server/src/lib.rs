//! # recsync Server
//!
//! Auth-gated read and write handlers on top of the recsync engine.
//!
//! This crate provides:
//! - The read endpoint (batched record fetch, no transaction)
//! - The write endpoint (transactional batch through the coordinator)
//! - Authentication (HMAC-SHA256 tokens binding a user id)
//! - Error mapping to the wire codes BAD_REQUEST, FORBIDDEN, CONFLICT
//!   and INTERNAL_ERROR
//!
//! Transports (HTTP, WebSocket, ...) live outside this crate. They
//! deserialize a [`RequestMessage`], authenticate the caller and pass both
//! to [`SyncServer`].
//!
//! # Authentication
//!
//! ```rust,ignore
//! use recsync_server::{ServerConfig, SyncServer};
//!
//! let config = ServerConfig::new().with_table("widgets").with_auth("my-secret");
//! let server = SyncServer::new(config, store)?;
//!
//! let token = server.issue_token("u1")?;
//! let caller = server.authenticate(&token)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod error;
mod handler;
mod protocol;
mod server;

pub use auth::{AuthConfig, Caller, TokenValidator};
pub use config::{ServerConfig, TableConfig};
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use protocol::{
    ErrorCode, ErrorResponse, GetRecordsRequest, GetRecordsResponse, RequestMessage,
    ResponseMessage, WriteRequest, WriteResponse,
};
pub use server::SyncServer;
