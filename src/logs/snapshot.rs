//! # Snapshot Reader
//!
//! Fans out one fetch per connected server, in parallel, and reports every
//! returned entry through a callback. Used by plain scans and to build the
//! initial values of a new change-feed subscriber.
//!
//! Best effort: a server that is unreachable is skipped. A server that is
//! reachable but cannot read its log is reported, but only after every
//! fetch has finished, and only the first such failure. Cancellation wins
//! over any read failure.

use futures_util::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::codec::server_datum;
use super::config::LogsConfig;
use super::directory::{Directory, PeerId, ServerId};
use super::entry::LogEntry;
use super::errors::{LogsError, LogsResult};
use super::fetch::{fetch_interruptible, FetchError, LogFetcher, TimeRange};
use crate::observability::{Event, FeedMetrics, Logger};

/// Borrowed view of everything a scan needs
pub struct SnapshotReader<'a> {
    pub directory: &'a dyn Directory,
    pub fetcher: &'a dyn LogFetcher,
    pub config: &'a LogsConfig,
    pub metrics: &'a FeedMetrics,
}

impl<'a> SnapshotReader<'a> {
    pub fn new(
        directory: &'a dyn Directory,
        fetcher: &'a dyn LogFetcher,
        config: &'a LogsConfig,
        metrics: &'a FeedMetrics,
    ) -> Self {
        Self {
            directory,
            fetcher,
            config,
            metrics,
        }
    }

    /// Fetch recent entries from every connected server.
    ///
    /// `callback(entry, peer, server_id, server_datum)` runs once per entry,
    /// grouped by server, in the order that server returned them.
    pub async fn scan<F>(&self, cancel: &CancellationToken, mut callback: F) -> LogsResult<()>
    where
        F: FnMut(&LogEntry, &PeerId, &ServerId, &Value),
    {
        let servers: Vec<_> = self
            .directory
            .read_all()
            .into_iter()
            .filter(|(_, entry)| entry.is_server())
            .collect();

        let fetches = servers.iter().map(|(peer, entry)| async move {
            let result = fetch_interruptible(
                self.fetcher,
                &entry.log_card,
                self.config.entries_per_server,
                TimeRange::all(),
                cancel,
            )
            .await;
            (peer, entry, result)
        });
        let results = join_all(fetches).await;

        let mut first_error: Option<LogsError> = None;
        for (peer, entry, result) in results {
            match result {
                Ok(entries) => {
                    self.metrics.add_rows_scanned(entries.len() as u64);
                    let datum = server_datum(&entry.name, &entry.server_id, self.config.identifier_format);
                    for log_entry in &entries {
                        callback(log_entry, peer, &entry.server_id, &datum);
                    }
                }
                // Interruption is checked once below.
                Err(FetchError::Interrupted) => {}
                Err(FetchError::Transport(_)) => {
                    // The server disconnected; it simply has no rows.
                    self.metrics.increment_fetch_failures();
                }
                Err(FetchError::Read(message)) => {
                    self.metrics.increment_fetch_failures();
                    Logger::warn(
                        Event::ScanReadFailure,
                        &[("server", entry.name.as_str()), ("message", message.as_str())],
                    );
                    if first_error.is_none() {
                        first_error = Some(LogsError::read_failure(entry.name.clone(), message));
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(LogsError::Interrupted);
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
