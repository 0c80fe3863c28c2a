//! CLI command implementations.

pub mod check_config;
pub mod run;

use recsync_server::{ServerConfig, ServerError};
use std::path::Path;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration could not be loaded or is invalid.
    #[error("{path}: {source}")]
    Config {
        /// Config file path.
        path: String,
        /// Underlying error.
        #[source]
        source: ServerError,
    },

    /// Script could not be read.
    #[error("failed to read script: {0}")]
    Io(#[from] std::io::Error),

    /// Script is not valid JSON.
    #[error("invalid script: {0}")]
    Script(#[from] serde_json::Error),

    /// Server setup failed.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Some script steps failed under `--strict`.
    #[error("{failed} of {total} step(s) failed")]
    StepsFailed {
        /// Failed steps.
        failed: usize,
        /// All steps.
        total: usize,
    },
}

/// Loads and validates a configuration file.
pub fn load_config(path: &Path) -> Result<ServerConfig, CliError> {
    let wrap = |source| CliError::Config {
        path: path.display().to_string(),
        source,
    };
    let config = ServerConfig::from_file(path).map_err(wrap)?;
    config.validate().map_err(wrap)?;
    Ok(config)
}
