//! Check-config command implementation.

use super::{load_config, CliError};
use std::io::Write;
use std::path::Path;

/// Runs the check-config command.
///
/// Loads the config, validates it and builds the table registry exactly
/// as the server would at startup.
pub fn run(path: &Path, out: &mut impl Write) -> Result<(), CliError> {
    let config = load_config(path)?;
    let registry = config.build_registry().map_err(|source| CliError::Config {
        path: path.display().to_string(),
        source,
    })?;

    writeln!(out, "Configuration {} is valid", path.display())?;
    writeln!(out)?;
    writeln!(out, "Tables ({}):", registry.len())?;
    for table in registry.tables() {
        let physical = registry.resolve(table).unwrap_or(table);
        if physical == table {
            writeln!(out, "  {table}")?;
        } else {
            writeln!(out, "  {table} -> {physical}")?;
        }
    }
    writeln!(out)?;
    writeln!(out, "Max read pointers:     {}", config.max_read_pointers)?;
    writeln!(out, "Max write operations:  {}", config.max_write_operations)?;
    writeln!(
        out,
        "Authentication:        {}",
        if config.require_auth { "required" } else { "disabled" }
    )?;
    writeln!(out, "Token expiry:          {}s", config.token_expiry_secs)?;
    writeln!(
        out,
        "Notification buffer:   {}",
        config.notification_channel_capacity
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use recsync_testkit::json_file;
    use serde_json::json;

    #[test]
    fn prints_tables() {
        let config = json_file(&json!({
            "tables": [
                { "name": "widgets" },
                { "name": "gadgets", "physicalName": "app_gadgets" }
            ]
        }));

        let mut out = Vec::new();
        run(config.path(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Tables (2):"));
        assert!(text.contains("  gadgets -> app_gadgets"));
        assert!(text.contains("  widgets\n"));
        assert!(text.contains("disabled"));
    }

    #[test]
    fn rejects_invalid_table_name() {
        let config = json_file(&json!({ "tables": [{ "name": "bad name" }] }));
        let mut out = Vec::new();
        assert!(matches!(
            run(config.path(), &mut out),
            Err(CliError::Config { .. })
        ));
    }

    #[test]
    fn rejects_auth_without_secret() {
        let config = json_file(&json!({ "tables": [], "requireAuth": true }));
        let mut out = Vec::new();
        assert!(run(config.path(), &mut out).is_err());
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = Vec::new();
        assert!(run(&dir.path().join("nope.json"), &mut out).is_err());
    }
}
