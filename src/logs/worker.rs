//! # Peer Worker
//!
//! Tails one peer's log for one feed.
//!
//! ```text
//! Discovering --(newest entry found)--> Started --> Polling --+
//!      |                                               ^      |
//!      |                                               +------+
//!      +--(peer left)--> Gone        Polling --(peer left)--> Gone
//! ```
//!
//! Discovery fetches the single newest entry and makes its timestamp the
//! low-water mark. Polling fetches everything strictly newer than the mark
//! and emits each entry once, oldest first. Fetch failures of any kind are
//! treated as "nothing yet"; only the directory decides when a worker ends.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::codec::{encode_entry, encode_key};
use super::directory::{LogBusinessCard, PeerId, ServerId};
use super::entry::LogEntry;
use super::errors::LogsError;
use super::feed::FeedShared;
use super::fetch::{fetch_interruptible, FetchError, TimeRange};
use super::sink::{RowChange, SinkState};
use crate::observability::{Event, FeedMetrics, Logger};

/// Why a worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerExit {
    /// Peer left the directory
    Gone,
    /// Server could not be resolved while delivering
    Abandoned,
    /// Feed shut down
    Interrupted,
}

impl From<LogsError> for WorkerExit {
    fn from(_: LogsError) -> Self {
        // Every fallible await in a worker fails only by interruption.
        WorkerExit::Interrupted
    }
}

/// Tailing task for one peer
pub(crate) struct PeerWorker {
    shared: Arc<FeedShared>,
    peer: PeerId,
    server_id: ServerId,
    card: LogBusinessCard,
    /// Still owes the startup barrier an arrival
    starter_pending: bool,
}

impl PeerWorker {
    pub(crate) fn new(
        shared: Arc<FeedShared>,
        peer: PeerId,
        server_id: ServerId,
        card: LogBusinessCard,
        is_starter: bool,
    ) -> Self {
        Self {
            shared,
            peer,
            server_id,
            card,
            starter_pending: is_starter,
        }
    }

    /// Run until the peer leaves or the feed shuts down
    pub(crate) async fn run(mut self) {
        let cancel = self.shared.cancel.clone();
        let exit = self.tail(&cancel).await;

        // Never leave the barrier waiting on a worker that is gone.
        self.arrive_if_starter();

        let peer = self.peer.to_string();
        match exit {
            WorkerExit::Gone => {
                Logger::trace(Event::WorkerGone, &[("peer", peer.as_str())]);
            }
            WorkerExit::Abandoned => {
                Logger::trace(Event::WorkerAbandoned, &[("peer", peer.as_str())]);
            }
            WorkerExit::Interrupted => {}
        }
        if exit != WorkerExit::Interrupted {
            if let Ok(mut state) = self.shared.sink.lock(&cancel).await {
                // A reconnect may already have a fresh worker on this peer.
                if !self.shared.is_tracked(&self.peer) {
                    state.forget_peer(&self.peer);
                }
            }
        }
        self.shared.worker_finished();
    }

    async fn tail(&mut self, cancel: &CancellationToken) -> WorkerExit {
        let initial = match self.discover(cancel).await {
            Ok(timestamp) => timestamp,
            Err(exit) => return exit,
        };

        match self.shared.sink.lock(cancel).await {
            Ok(mut state) => state.set_last_timestamp(self.peer, initial),
            Err(_) => return WorkerExit::Interrupted,
        }
        let peer = self.peer.to_string();
        let mark = initial.to_rfc3339();
        Logger::trace(
            Event::WorkerDiscovered,
            &[("peer", peer.as_str()), ("low_water", mark.as_str())],
        );

        self.arrive_if_starter();

        match self.poll(cancel).await {
            Ok(never) => match never {},
            Err(exit) => exit,
        }
    }

    /// Find the newest entry of the peer's log
    async fn discover(&self, cancel: &CancellationToken) -> Result<DateTime<Utc>, WorkerExit> {
        loop {
            if !self.shared.check_connected(&self.peer) {
                return Err(WorkerExit::Gone);
            }

            match self.fetch(1, TimeRange::all(), cancel).await? {
                Some(entries) if !entries.is_empty() => return Ok(entries[0].timestamp),
                // Empty log or a failed fetch; try again shortly.
                _ => {}
            }

            sleep(self.shared.config.discovery_backoff, cancel).await?;
        }
    }

    /// Poll for entries newer than the low-water mark, forever
    async fn poll(&self, cancel: &CancellationToken) -> Result<std::convert::Infallible, WorkerExit> {
        loop {
            if !self.shared.check_connected(&self.peer) {
                return Err(WorkerExit::Gone);
            }

            let Some(low_water) = self.shared.sink.lock(cancel).await?.last_timestamp(&self.peer) else {
                // Our mark is only removed on the way out.
                return Err(WorkerExit::Gone);
            };

            let entries = self
                .fetch(self.shared.config.entries_per_server, TimeRange::after(low_water), cancel)
                .await?
                .unwrap_or_default();

            if !entries.is_empty() {
                let Some(server) = self.shared.resolve_server_datum(&self.server_id) else {
                    // Disconnected between the membership check and now.
                    self.shared.forget(&self.peer);
                    return Err(WorkerExit::Abandoned);
                };

                let mut state = self.shared.sink.lock(cancel).await?;
                let emitted = emit_new_entries(
                    &mut state,
                    &self.peer,
                    &self.server_id,
                    &server,
                    &entries,
                    &self.shared.metrics,
                );
                drop(state);

                let peer = self.peer.to_string();
                let count = emitted.to_string();
                Logger::trace(Event::WorkerPolled, &[("peer", peer.as_str()), ("emitted", count.as_str())]);
            }

            sleep(self.shared.config.poll_interval, cancel).await?;
        }
    }

    /// Fetch from the peer. `Ok(None)` means the fetch failed in a way the
    /// worker shrugs off; only interruption is an error.
    async fn fetch(
        &self,
        max_entries: usize,
        range: TimeRange,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<LogEntry>>, WorkerExit> {
        match fetch_interruptible(self.shared.fetcher.as_ref(), &self.card, max_entries, range, cancel).await {
            Ok(entries) => Ok(Some(entries)),
            Err(FetchError::Interrupted) => Err(WorkerExit::Interrupted),
            Err(FetchError::Transport(_)) | Err(FetchError::Read(_)) => {
                self.shared.metrics.increment_fetch_failures();
                Ok(None)
            }
        }
    }

    fn arrive_if_starter(&mut self) {
        if self.starter_pending {
            self.starter_pending = false;
            self.shared.barrier.arrive();
        }
    }
}

async fn sleep(duration: Duration, cancel: &CancellationToken) -> Result<(), WorkerExit> {
    tokio::select! {
        _ = cancel.cancelled() => Err(WorkerExit::Interrupted),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Emit the entries of one fetch (newest first, as fetched) that are newer
/// than `peer`'s low-water mark, oldest first, advancing the mark as it
/// goes. Anything at or below the mark was already delivered, most likely
/// by a subscriber's initial read. Returns the number of changes emitted.
pub(crate) fn emit_new_entries(
    state: &mut SinkState,
    peer: &PeerId,
    server_id: &ServerId,
    server: &Value,
    entries: &[LogEntry],
    metrics: &FeedMetrics,
) -> usize {
    let mut emitted = 0;
    for entry in entries.iter().rev() {
        if let Some(mark) = state.last_timestamp(peer) {
            if entry.timestamp <= mark {
                metrics.increment_overlap_discards();
                continue;
            }
        }
        state.set_last_timestamp(*peer, entry.timestamp);

        let row = encode_entry(entry, server_id, server);
        let key = encode_key(entry.timestamp, *server_id).print_primary();
        state.send_all_change(&RowChange::insert(key, row));
        metrics.increment_rows_emitted();
        emitted += 1;
    }
    emitted
}
