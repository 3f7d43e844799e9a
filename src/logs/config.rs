//! Logs Table Configuration
//!
//! Tuning knobs for scans and tailing. Defaults match the cluster's own
//! behaviour: at most 1000 entries per server per fetch, one poll per second.

use std::time::Duration;

use super::codec::IdentifierFormat;
use super::errors::{LogsError, LogsResult};

/// Maximum entries fetched from one server in a single request
pub const ENTRIES_PER_SERVER: usize = 1000;

/// Delay between tail polls
pub const POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Delay before retrying discovery of an empty or unreadable log
pub const DISCOVERY_BACKOFF: Duration = Duration::from_millis(1000);

/// Configuration for a logs table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogsConfig {
    /// Cap on entries per server per fetch
    pub entries_per_server: usize,

    /// Interval between polls once a worker has started
    pub poll_interval: Duration,

    /// Retry delay while a worker is still discovering
    pub discovery_backoff: Duration,

    /// How the `server` field names a server
    pub identifier_format: IdentifierFormat,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            entries_per_server: ENTRIES_PER_SERVER,
            poll_interval: POLL_INTERVAL,
            discovery_backoff: DISCOVERY_BACKOFF,
            identifier_format: IdentifierFormat::Name,
        }
    }
}

impl LogsConfig {
    /// Same config with a different poll interval and discovery backoff
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self.discovery_backoff = interval;
        self
    }

    pub fn with_identifier_format(mut self, format: IdentifierFormat) -> Self {
        self.identifier_format = format;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LogsResult<()> {
        if self.entries_per_server == 0 {
            return Err(LogsError::Config("entries_per_server must be > 0".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(LogsError::Config("poll_interval must be > 0".into()));
        }
        if self.discovery_backoff.is_zero() {
            return Err(LogsError::Config("discovery_backoff must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LogsConfig::default();
        assert_eq!(config.entries_per_server, 1000);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.identifier_format, IdentifierFormat::Name);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = LogsConfig {
            entries_per_server: 0,
            ..LogsConfig::default()
        };
        assert!(matches!(config.validate(), Err(LogsError::Config(_))));

        let config = LogsConfig::default().with_poll_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
