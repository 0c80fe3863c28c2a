//! Caller authentication.
//!
//! Tokens are signed with HMAC-SHA256 and bind a user id to an issue
//! timestamp, so the write handler can check `authorId` against the
//! caller who actually presented the token.
//!
//! ## Token Format
//!
//! - 2 bytes: user id length (big-endian)
//! - N bytes: user id (UTF-8)
//! - 8 bytes: issue timestamp (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 over everything before it
//!
//! Tokens are raw bytes; transports choose their own text encoding.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_LEN: usize = 32;
const TIMESTAMP_LEN: usize = 8;

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Caller {
    user_id: String,
}

impl Caller {
    /// Creates a caller the transport has already authenticated.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }

    /// Returns the caller's user id.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and validates caller tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a token for `user_id`, valid from now.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidRequest`] if the user id is empty or
    /// longer than 65535 bytes.
    pub fn create_token(&self, user_id: &str) -> ServerResult<Vec<u8>> {
        self.create_token_at(user_id, now_millis())
    }

    fn create_token_at(&self, user_id: &str, issued_at_ms: u64) -> ServerResult<Vec<u8>> {
        let len = u16::try_from(user_id.len())
            .ok()
            .filter(|len| *len > 0)
            .ok_or_else(|| ServerError::InvalidRequest("user id length out of range".into()))?;

        let mut token = Vec::with_capacity(2 + user_id.len() + TIMESTAMP_LEN + SIGNATURE_LEN);
        token.extend_from_slice(&len.to_be_bytes());
        token.extend_from_slice(user_id.as_bytes());
        token.extend_from_slice(&issued_at_ms.to_be_bytes());

        let signature = self.mac(&token)?.finalize().into_bytes();
        token.extend_from_slice(&signature);
        Ok(token)
    }

    /// Validates a token and returns the caller it was issued to.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Unauthenticated`] if the token is malformed,
    /// tampered with or expired.
    pub fn validate(&self, token: &[u8]) -> ServerResult<Caller> {
        let rejected = |reason: &str| ServerError::Unauthenticated(reason.to_string());

        let (len_bytes, rest) = split(token, 2).ok_or_else(|| rejected("token too short"))?;
        let user_len = usize::from(u16::from_be_bytes([len_bytes[0], len_bytes[1]]));
        if rest.len() != user_len + TIMESTAMP_LEN + SIGNATURE_LEN {
            return Err(rejected("invalid token length"));
        }

        let signed_len = token.len() - SIGNATURE_LEN;
        let (signed, signature) = token.split_at(signed_len);
        self.mac(signed)?
            .verify_slice(signature)
            .map_err(|_| rejected("invalid signature"))?;

        let (user_bytes, timestamp_bytes) = rest[..user_len + TIMESTAMP_LEN].split_at(user_len);
        let user_id = std::str::from_utf8(user_bytes).map_err(|_| rejected("user id is not UTF-8"))?;
        let timestamp: [u8; TIMESTAMP_LEN] = timestamp_bytes
            .try_into()
            .map_err(|_| rejected("invalid timestamp"))?;
        let issued_at = u64::from_be_bytes(timestamp);

        let expiry_millis = u64::try_from(self.config.token_expiry.as_millis()).unwrap_or(u64::MAX);
        if now_millis() > issued_at.saturating_add(expiry_millis) {
            return Err(rejected("token expired"));
        }

        Ok(Caller::new(user_id))
    }

    fn mac(&self, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Config(format!("invalid auth secret: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("token_expiry", &self.config.token_expiry)
            .finish_non_exhaustive()
    }
}

fn split(bytes: &[u8], at: usize) -> Option<(&[u8], &[u8])> {
    (bytes.len() >= at).then(|| bytes.split_at(at))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
