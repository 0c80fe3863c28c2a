//! Server configuration.

use crate::error::{ServerError, ServerResult};
use recsync_core::TableRegistry;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// A table exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableConfig {
    /// Logical name used on the wire.
    pub name: String,
    /// Storage table name, if different from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_name: Option<String>,
}

impl TableConfig {
    /// Creates a table whose physical name equals its logical name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            physical_name: None,
        }
    }

    /// Maps the table to a different storage table.
    pub fn with_physical_name(mut self, physical_name: impl Into<String>) -> Self {
        self.physical_name = Some(physical_name.into());
        self
    }
}

/// Configuration for the sync server.
///
/// Deserializes from camelCase JSON; every field except `tables` has a
/// default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Tables clients may read and write.
    pub tables: Vec<TableConfig>,
    /// Maximum pointers in one read.
    pub max_read_pointers: usize,
    /// Maximum operations in one write.
    pub max_write_operations: usize,
    /// Whether callers must present a signed token.
    pub require_auth: bool,
    /// Secret for token signing (if auth enabled).
    pub auth_secret: Option<String>,
    /// Token lifetime in seconds.
    pub token_expiry_secs: u64,
    /// Per-subscriber buffer of the notification channel.
    pub notification_channel_capacity: usize,
}

impl ServerConfig {
    /// Creates a configuration with defaults and no tables.
    pub fn new() -> Self {
        Self {
            tables: Vec::new(),
            max_read_pointers: 1000,
            max_write_operations: 500,
            require_auth: false,
            auth_secret: None,
            token_expiry_secs: 24 * 60 * 60,
            notification_channel_capacity: 1024,
        }
    }

    /// Parses a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if the JSON is malformed.
    pub fn from_json_str(json: &str) -> ServerResult<Self> {
        serde_json::from_str(json).map_err(|e| ServerError::Config(e.to_string()))
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> ServerResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Exposes a table under its own name.
    pub fn with_table(mut self, name: impl Into<String>) -> Self {
        self.tables.push(TableConfig::new(name));
        self
    }

    /// Exposes a table under a logical name mapped to a storage table.
    pub fn with_mapped_table(
        mut self,
        name: impl Into<String>,
        physical_name: impl Into<String>,
    ) -> Self {
        self.tables
            .push(TableConfig::new(name).with_physical_name(physical_name));
        self
    }

    /// Sets the maximum pointers per read.
    pub fn with_max_read_pointers(mut self, max: usize) -> Self {
        self.max_read_pointers = max;
        self
    }

    /// Sets the maximum operations per write.
    pub fn with_max_write_operations(mut self, max: usize) -> Self {
        self.max_write_operations = max;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: impl Into<String>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret.into());
        self
    }

    /// Sets the token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry_secs = expiry.as_secs();
        self
    }

    /// Sets the notification buffer per subscriber.
    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_channel_capacity = capacity;
        self
    }

    /// Returns the token lifetime.
    pub fn token_expiry(&self) -> Duration {
        Duration::from_secs(self.token_expiry_secs)
    }

    /// Checks the configuration for contradictions.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] describing the first problem found.
    pub fn validate(&self) -> ServerResult<()> {
        if self.require_auth && self.auth_secret.as_deref().map_or(true, str::is_empty) {
            return Err(ServerError::Config(
                "requireAuth is set but authSecret is missing".into(),
            ));
        }
        if self.max_read_pointers == 0 {
            return Err(ServerError::Config("maxReadPointers must be positive".into()));
        }
        if self.max_write_operations == 0 {
            return Err(ServerError::Config(
                "maxWriteOperations must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Registers every configured table and freezes the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a table name is invalid or mapped twice.
    pub fn build_registry(&self) -> ServerResult<Arc<TableRegistry>> {
        let mut registry = TableRegistry::new();
        for table in &self.tables {
            registry
                .register(&table.name, table.physical_name.as_deref())
                .map_err(|e| ServerError::Config(e.to_string()))?;
        }
        Ok(registry.into_shared())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
