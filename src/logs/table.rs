//! # Logs Table
//!
//! The read-only `logs` table: one row per log entry of every connected
//! server, keyed by `[timestamp, server_id]`.
//!
//! Scans and point lookups go straight to the servers. Change feeds share
//! one [`FeedMachinery`], built by the first subscriber.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::codec::{decode_key, encode_entry, server_datum};
use super::config::LogsConfig;
use super::directory::Directory;
use super::errors::{LogsError, LogsResult};
use super::feed::{FeedMachinery, Subscription};
use super::fetch::{fetch_interruptible, FetchError, LogFetcher, TimeRange};
use super::snapshot::SnapshotReader;
use crate::observability::{Event, FeedMetrics, Logger};

/// Name of the table
pub const TABLE_NAME: &str = "logs";

/// Name of the primary key field
pub const PRIMARY_KEY: &str = "id";

/// The cluster logs table
pub struct LogsTable {
    directory: Arc<dyn Directory>,
    fetcher: Arc<dyn LogFetcher>,
    config: LogsConfig,
    metrics: Arc<FeedMetrics>,
    feed: Mutex<Option<Arc<FeedMachinery>>>,
}

impl LogsTable {
    pub fn new(
        directory: Arc<dyn Directory>,
        fetcher: Arc<dyn LogFetcher>,
        config: LogsConfig,
    ) -> LogsResult<Self> {
        config.validate()?;
        Ok(Self {
            directory,
            fetcher,
            config,
            metrics: Arc::new(FeedMetrics::new()),
            feed: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &'static str {
        TABLE_NAME
    }

    pub fn primary_key_name(&self) -> &'static str {
        PRIMARY_KEY
    }

    pub fn config(&self) -> &LogsConfig {
        &self.config
    }

    pub fn metrics(&self) -> &FeedMetrics {
        &self.metrics
    }

    /// Every row currently readable, grouped by server, newest first
    /// within a server.
    pub async fn read_all_rows(&self, cancel: &CancellationToken) -> LogsResult<Vec<Value>> {
        let reader = SnapshotReader::new(
            self.directory.as_ref(),
            self.fetcher.as_ref(),
            &self.config,
            &self.metrics,
        );
        let mut rows = Vec::new();
        reader
            .scan(cancel, |entry, _, server_id, server| {
                rows.push(encode_entry(entry, server_id, server));
            })
            .await?;
        Ok(rows)
    }

    /// Look up a single row by primary key.
    ///
    /// A key that is malformed, names an unknown or disconnected server, or
    /// matches nothing is simply absent.
    pub async fn read_row(&self, key: &Value, cancel: &CancellationToken) -> LogsResult<Option<Value>> {
        let Ok(row_key) = decode_key(key) else {
            return Ok(None);
        };

        let Some(peer) = self.directory.peer_for_server(&row_key.server_id) else {
            return Ok(None);
        };
        // The peer may have left since it was resolved.
        let Some(entry) = self.directory.read_key(&peer) else {
            return Ok(None);
        };

        let fetched = fetch_interruptible(
            self.fetcher.as_ref(),
            &entry.log_card,
            self.config.entries_per_server,
            TimeRange::exactly(row_key.timestamp),
            cancel,
        )
        .await;

        let entries = match fetched {
            Ok(entries) => entries,
            Err(FetchError::Transport(message)) => {
                let server = row_key.server_id.to_string();
                Logger::trace(
                    Event::LookupFailed,
                    &[("server", server.as_str()), ("message", message.as_str())],
                );
                return Ok(None);
            }
            Err(FetchError::Read(message)) => {
                return Err(LogsError::read_failure(entry.name, message));
            }
            Err(FetchError::Interrupted) => return Err(LogsError::Interrupted),
        };

        match entries.as_slice() {
            [] => Ok(None),
            [log_entry] => {
                let server = server_datum(&entry.name, &row_key.server_id, self.config.identifier_format);
                let mut row = encode_entry(log_entry, &row_key.server_id, &server);
                // Echo the key exactly as the caller spelled it.
                row[PRIMARY_KEY] = key.clone();
                Ok(Some(row))
            }
            _ => Err(LogsError::AmbiguousTimestamp { server: entry.name }),
        }
    }

    /// The table is read-only; every write fails.
    pub fn write_row(&self, _key: &Value, _value: Option<&Value>) -> LogsResult<()> {
        Err(LogsError::ReadOnly)
    }

    /// Subscribe to the table's change feed, starting the shared feed
    /// machinery on first use.
    pub async fn subscribe(&self, cancel: &CancellationToken) -> LogsResult<Subscription> {
        let feed = self.feed(cancel).await?;
        feed.subscribe(cancel).await
    }

    async fn feed(&self, cancel: &CancellationToken) -> LogsResult<Arc<FeedMachinery>> {
        let mut slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LogsError::Interrupted),
            slot = self.feed.lock() => slot,
        };
        if let Some(feed) = slot.as_ref().filter(|feed| !feed.is_shut_down()) {
            return Ok(Arc::clone(feed));
        }

        let feed = Arc::new(
            FeedMachinery::start(
                Arc::clone(&self.directory),
                Arc::clone(&self.fetcher),
                self.config.clone(),
                Arc::clone(&self.metrics),
                cancel,
            )
            .await?,
        );
        *slot = Some(Arc::clone(&feed));
        Ok(feed)
    }

    /// The running feed machinery, if any subscriber has started it
    pub async fn feed_machinery(&self) -> Option<Arc<FeedMachinery>> {
        self.feed.lock().await.clone()
    }

    /// Stop the feed machinery and wait for its workers to finish.
    /// Existing subscribers stop receiving changes.
    pub async fn shutdown(&self) {
        let feed = self.feed.lock().await.take();
        if let Some(feed) = feed {
            feed.shutdown().await;
        }
    }
}

impl std::fmt::Debug for LogsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogsTable")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
