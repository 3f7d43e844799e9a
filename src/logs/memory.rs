//! # In-Memory Log Fetcher
//!
//! Holds per-card logs in memory. Failures and latency can be injected per
//! card, which makes it the transport of choice for exercising scans and
//! tailing without a network.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::directory::LogBusinessCard;
use super::entry::LogEntry;
use super::fetch::{FetchError, FetchFuture, LogFetcher, TimeRange};

#[derive(Debug, Default)]
struct CardLog {
    /// Oldest first
    entries: Vec<LogEntry>,
    failure: Option<FetchError>,
    latency: Option<Duration>,
    fetches: u64,
}

/// Log fetcher backed by in-memory entry lists
#[derive(Debug, Default)]
pub struct MemoryLogFetcher {
    logs: RwLock<HashMap<LogBusinessCard, CardLog>>,
}

impl MemoryLogFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `card` reachable with an empty log
    pub fn register(&self, card: &LogBusinessCard) {
        let mut logs = self.logs.write().unwrap_or_else(PoisonError::into_inner);
        logs.entry(card.clone()).or_default();
    }

    /// Append an entry to a card's log
    pub fn append(&self, card: &LogBusinessCard, entry: LogEntry) {
        let mut logs = self.logs.write().unwrap_or_else(PoisonError::into_inner);
        let log = logs.entry(card.clone()).or_default();
        let pos = log.entries.partition_point(|e| e.timestamp <= entry.timestamp);
        log.entries.insert(pos, entry);
    }

    /// Make every fetch against `card` fail with `failure` (`None` clears it)
    pub fn set_failure(&self, card: &LogBusinessCard, failure: Option<FetchError>) {
        let mut logs = self.logs.write().unwrap_or_else(PoisonError::into_inner);
        logs.entry(card.clone()).or_default().failure = failure;
    }

    /// Delay every fetch against `card`
    pub fn set_latency(&self, card: &LogBusinessCard, latency: Option<Duration>) {
        let mut logs = self.logs.write().unwrap_or_else(PoisonError::into_inner);
        logs.entry(card.clone()).or_default().latency = latency;
    }

    /// Number of fetches served for `card`
    pub fn fetch_count(&self, card: &LogBusinessCard) -> u64 {
        self.logs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(card)
            .map_or(0, |log| log.fetches)
    }

    fn serve(
        &self,
        card: &LogBusinessCard,
        max_entries: usize,
        range: TimeRange,
    ) -> (Option<Duration>, Result<Vec<LogEntry>, FetchError>) {
        let mut logs = self.logs.write().unwrap_or_else(PoisonError::into_inner);
        let Some(log) = logs.get_mut(card) else {
            return (
                None,
                Err(FetchError::Transport(format!("no peer at `{}`", card.address()))),
            );
        };
        log.fetches += 1;

        if let Some(failure) = &log.failure {
            return (log.latency, Err(failure.clone()));
        }

        let entries = log
            .entries
            .iter()
            .rev()
            .filter(|e| range.contains(&e.timestamp))
            .take(max_entries)
            .cloned()
            .collect();
        (log.latency, Ok(entries))
    }
}

impl LogFetcher for MemoryLogFetcher {
    fn fetch<'a>(
        &'a self,
        card: &'a LogBusinessCard,
        max_entries: usize,
        range: TimeRange,
        cancel: &'a CancellationToken,
    ) -> FetchFuture<'a> {
        Box::pin(async move {
            let (latency, result) = self.serve(card, max_entries, range);
            if let Some(latency) = latency {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(FetchError::Interrupted),
                    _ = tokio::time::sleep(latency) => {}
                }
            }
            result
        })
    }
}
