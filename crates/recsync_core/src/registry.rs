//! Table registry: the allowlist of syncable tables.
//!
//! The sync endpoints accept table names from clients, so every load and
//! save resolves the logical name here first. A table that was never
//! registered is rejected before any storage call is made.
//!
//! The registry is populated at startup and then shared read-only as an
//! `Arc<TableRegistry>`; there is no global instance.

use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Allowlist mapping logical table names to physical storage names.
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    tables: HashMap<String, String>,
}

impl TableRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table, stored under `physical_name` or its own name.
    ///
    /// Registering the same mapping twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRegistration`] if either name is not a
    /// plain identifier or the table is already mapped elsewhere.
    pub fn register(&mut self, table: &str, physical_name: Option<&str>) -> CoreResult<()> {
        let physical = physical_name.unwrap_or(table);
        validate_identifier(table, table)?;
        validate_identifier(table, physical)?;

        match self.tables.get(table) {
            Some(existing) if existing == physical => Ok(()),
            Some(existing) => Err(CoreError::InvalidRegistration {
                table: table.to_string(),
                reason: format!("already registered as {existing}"),
            }),
            None => {
                self.tables.insert(table.to_string(), physical.to_string());
                Ok(())
            }
        }
    }

    /// Builder-style [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn with_table(mut self, table: &str, physical_name: Option<&str>) -> CoreResult<Self> {
        self.register(table, physical_name)?;
        Ok(self)
    }

    /// Returns true if the table is registered.
    #[must_use]
    pub fn is_allowed(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Returns the physical name of a registered table.
    #[must_use]
    pub fn resolve(&self, table: &str) -> Option<&str> {
        self.tables.get(table).map(String::as_str)
    }

    /// Resolves a table or fails with [`CoreError::TableNotAllowed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the table is not registered.
    pub fn ensure_allowed(&self, table: &str) -> CoreResult<&str> {
        self.resolve(table)
            .ok_or_else(|| CoreError::table_not_allowed(table))
    }

    /// Returns the registered logical table names, sorted.
    #[must_use]
    pub fn tables(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the number of registered tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if no table is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Freezes the registry for sharing across requests.
    #[must_use]
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

/// Physical names end up inside queries, so only plain identifiers pass.
fn validate_identifier(table: &str, name: &str) -> CoreResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidRegistration {
            table: table.to_string(),
            reason: format!("{name:?} is not a valid identifier"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_resolve() {
        let mut registry = TableRegistry::new();
        registry.register("widgets", None).unwrap();
        registry.register("notes", Some("realtime_notes")).unwrap();

        assert!(registry.is_allowed("widgets"));
        assert_eq!(registry.resolve("widgets"), Some("widgets"));
        assert_eq!(registry.resolve("notes"), Some("realtime_notes"));
        assert_eq!(registry.resolve("users"), None);
        assert_eq!(registry.tables(), vec!["notes", "widgets"]);
    }

    #[test]
    fn register_is_idempotent() {
        let mut registry = TableRegistry::new();
        registry.register("widgets", Some("w")).unwrap();
        registry.register("widgets", Some("w")).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn conflicting_registration_fails() {
        let mut registry = TableRegistry::new();
        registry.register("widgets", None).unwrap();
        let result = registry.register("widgets", Some("other"));
        assert!(matches!(result, Err(CoreError::InvalidRegistration { .. })));
        assert_eq!(registry.resolve("widgets"), Some("widgets"));
    }

    #[test]
    fn invalid_identifiers_are_rejected() {
        let mut registry = TableRegistry::new();
        assert!(registry.register("", None).is_err());
        assert!(registry.register("1abc", None).is_err());
        assert!(registry.register("users; drop table x", None).is_err());
        assert!(registry.register("ok", Some("bad-name")).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn ensure_allowed() {
        let registry = TableRegistry::new().with_table("widgets", None).unwrap();
        assert_eq!(registry.ensure_allowed("widgets").unwrap(), "widgets");
        assert!(matches!(
            registry.ensure_allowed("secrets"),
            Err(CoreError::TableNotAllowed { table }) if table == "secrets"
        ));
    }
}
