//! Error types for the request handlers.

use crate::protocol::{ErrorCode, ErrorResponse};
use recsync_core::CoreError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while serving a request.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format or a batch over the configured limits.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No authenticated caller, or the token was rejected.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The write's author is not the authenticated caller.
    #[error("author {author} does not match caller {caller}")]
    AuthorMismatch {
        /// `authorId` from the request.
        author: String,
        /// Authenticated user id.
        caller: String,
    },

    /// Invalid server configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Error from the sync engine.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns the error class reported to the caller.
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::InvalidRequest(_) => ErrorCode::BadRequest,
            ServerError::Unauthenticated(_) | ServerError::AuthorMismatch { .. } => {
                ErrorCode::Forbidden
            }
            ServerError::Core(err) if err.is_conflict() => ErrorCode::Conflict,
            ServerError::Core(err) if err.is_client_error() => ErrorCode::BadRequest,
            ServerError::Core(_) | ServerError::Config(_) | ServerError::Io(_) => {
                ErrorCode::InternalError
            }
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.code() == ErrorCode::InternalError
    }

    /// Converts the error into the reply sent to the caller.
    ///
    /// Internal errors are reported opaquely; callers get only the class.
    pub fn to_response(&self) -> ErrorResponse {
        let message = if self.is_server_error() {
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let conflicting_records = match self {
            ServerError::Core(err) => err.conflicting_pointers().to_vec(),
            _ => Vec::new(),
        };

        ErrorResponse {
            code: self.code(),
            message,
            conflicting_records,
        }
    }
}
