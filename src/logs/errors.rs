//! # Logs Table Errors
//!
//! Error taxonomy for scans, point lookups, writes and change feeds.
//!
//! Transport failures never appear here: they are absorbed where they occur
//! (skipped by scans, "row absent" for lookups, retried by workers).

use thiserror::Error;

/// Result type for logs table operations
pub type LogsResult<T> = Result<T, LogsError>;

/// Fixed message returned for every write attempt
pub const READ_ONLY_MESSAGE: &str = "It's illegal to write to the `logs` system table.";

/// Logs table errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogsError {
    /// The operation was interrupted by its cancellation token
    #[error("Operation interrupted")]
    Interrupted,

    /// A reachable server could not read its own log file
    #[error("Problem with reading log file on server `{server}`: {message}")]
    ReadFailure { server: String, message: String },

    /// Two entries on one server share the requested timestamp
    #[error(
        "Problem when reading log file on server `{server}`: Found multiple log entries with identical timestamps."
    )]
    AmbiguousTimestamp { server: String },

    /// Primary key is not a `[timestamp, server_id]` pair
    #[error("Malformed primary key: {0}")]
    MalformedKey(String),

    /// A log line or field could not be interpreted
    #[error("Malformed log entry: {0}")]
    MalformedEntry(String),

    /// Any write to the table
    #[error("{}", READ_ONLY_MESSAGE)]
    ReadOnly,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LogsError {
    /// Create a read failure for the named server
    pub fn read_failure(server: impl Into<String>, message: impl Into<String>) -> Self {
        LogsError::ReadFailure {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Stable error code for external reporting
    pub fn code(&self) -> &'static str {
        match self {
            LogsError::Interrupted => "LOGS_INTERRUPTED",
            LogsError::ReadFailure { .. } => "LOGS_READ_FAILURE",
            LogsError::AmbiguousTimestamp { .. } => "LOGS_AMBIGUOUS_TIMESTAMP",
            LogsError::MalformedKey(_) => "LOGS_MALFORMED_KEY",
            LogsError::MalformedEntry(_) => "LOGS_MALFORMED_ENTRY",
            LogsError::ReadOnly => "LOGS_READ_ONLY",
            LogsError::Config(_) => "LOGS_CONFIG",
        }
    }

    /// Interruption is a normal shutdown path, not a failure
    pub fn is_interrupted(&self) -> bool {
        matches!(self, LogsError::Interrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_message_is_fixed() {
        assert_eq!(LogsError::ReadOnly.to_string(), READ_ONLY_MESSAGE);
    }

    #[test]
    fn test_read_failure_names_server() {
        let err = LogsError::read_failure("alpha", "permission denied");
        let text = err.to_string();
        assert!(text.contains("`alpha`"));
        assert!(text.contains("permission denied"));
        assert_eq!(err.code(), "LOGS_READ_FAILURE");
    }

    #[test]
    fn test_interrupted() {
        assert!(LogsError::Interrupted.is_interrupted());
        assert!(!LogsError::ReadOnly.is_interrupted());
    }
}
