//! # CLI Errors
//!
//! Any of these ends the process with status 1. The display form leads
//! with a stable code so scripts can match on it.

use std::io;

use thiserror::Error;

use crate::logs::LogsError;

/// Result type for CLI commands
pub type CliResult<T> = Result<T, CliError>;

/// CLI errors
#[derive(Debug, Error)]
pub enum CliError {
    /// Cluster file missing, unparsable or inconsistent
    #[error("CLUSTERLOGS_CLI_CONFIG_ERROR: {0}")]
    Config(String),

    /// Stdout or runtime failure
    #[error("CLUSTERLOGS_CLI_IO_ERROR: {0}")]
    Io(String),

    /// `--key` is not valid JSON
    #[error("CLUSTERLOGS_CLI_INVALID_KEY: {0}")]
    InvalidKey(String),

    #[error("CLUSTERLOGS_CLI_TABLE_ERROR: {0} ({code})", code = .0.code())]
    Table(#[from] LogsError),
}

impl CliError {
    /// Stable code, the prefix of the display form
    pub fn code(&self) -> &'static str {
        match self {
            CliError::Config(_) => "CLUSTERLOGS_CLI_CONFIG_ERROR",
            CliError::Io(_) => "CLUSTERLOGS_CLI_IO_ERROR",
            CliError::InvalidKey(_) => "CLUSTERLOGS_CLI_INVALID_KEY",
            CliError::Table(_) => "CLUSTERLOGS_CLI_TABLE_ERROR",
        }
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        CliError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Io(format!("JSON error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_leads_with_code() {
        let err = CliError::Config("no servers".into());
        assert_eq!(err.to_string(), "CLUSTERLOGS_CLI_CONFIG_ERROR: no servers");
        assert!(err.to_string().starts_with(err.code()));
    }

    #[test]
    fn test_table_error_keeps_logs_code() {
        let err = CliError::from(LogsError::ReadOnly);
        assert_eq!(err.code(), "CLUSTERLOGS_CLI_TABLE_ERROR");
        assert!(err.to_string().ends_with(&format!("({})", LogsError::ReadOnly.code())));
    }
}
