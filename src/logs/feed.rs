//! # Change Feed Machinery
//!
//! One `FeedMachinery` serves every change-feed subscriber of a logs table.
//! It tracks the set of connected server peers and runs one [`PeerWorker`]
//! per tracked peer. Peers present when the machinery is built are
//! "starters": construction does not return until each starter has found
//! its peer's newest entry (or seen the peer leave), so that a subscriber's
//! initial rows and its live updates meet without a gap.
//!
//! ## Invariant
//! At most one worker per connected `PeerId`. The tracked set is only
//! changed while holding its lock, and always together with a fresh
//! directory read for the peer in question.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::barrier::StartupBarrier;
use super::codec::{encode_entry, encode_key, server_datum};
use super::config::LogsConfig;
use super::directory::{Directory, DirectoryEntry, PeerId, ServerId};
use super::entry::LogEntry;
use super::errors::LogsResult;
use super::fetch::LogFetcher;
use super::sink::{ChangeReceiver, ChangeSink, RowChange};
use super::snapshot::SnapshotReader;
use super::worker::PeerWorker;
use crate::observability::{Event, FeedMetrics, Logger};

/// What a new subscriber receives
#[derive(Debug)]
pub struct Subscription {
    /// Every row visible when the subscription was registered
    pub initial: Vec<Value>,
    /// Changes after `initial`, in delivery order
    pub changes: ChangeReceiver,
}

/// State shared between the machinery handle and its tasks
pub(crate) struct FeedShared {
    pub(crate) directory: Arc<dyn Directory>,
    pub(crate) fetcher: Arc<dyn LogFetcher>,
    pub(crate) config: LogsConfig,
    pub(crate) metrics: Arc<FeedMetrics>,
    pub(crate) sink: ChangeSink,
    pub(crate) barrier: StartupBarrier,
    pub(crate) cancel: CancellationToken,
    tracked: Mutex<HashSet<PeerId>>,
    tasks: TaskTracker,
    active_workers: AtomicUsize,
}

impl FeedShared {
    /// Check whether `peer` is still in the directory; if not, stop
    /// tracking it. Both happen under the tracked-set lock so a reconnect
    /// can neither be missed nor get a second worker.
    pub(crate) fn check_connected(&self, peer: &PeerId) -> bool {
        let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        let connected = self
            .directory
            .read_key(peer)
            .is_some_and(|entry| entry.is_server());
        if !connected {
            tracked.remove(peer);
        }
        connected
    }

    pub(crate) fn is_tracked(&self, peer: &PeerId) -> bool {
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(peer)
    }

    /// Stop tracking `peer` unconditionally
    pub(crate) fn forget(&self, peer: &PeerId) {
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer);
    }

    /// Current `server` field value for a connected server
    pub(crate) fn resolve_server_datum(&self, server_id: &ServerId) -> Option<Value> {
        let peer = self.directory.peer_for_server(server_id)?;
        let entry = self.directory.read_key(&peer)?;
        Some(server_datum(&entry.name, server_id, self.config.identifier_format))
    }

    pub(crate) fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn worker_finished(&self) {
        self.active_workers.fetch_sub(1, Ordering::AcqRel);
        self.metrics.increment_workers_gone();
    }
}

/// Spawn a worker for `peer` unless one is already tracked.
///
/// The directory is re-read under the lock so a stale notification can't
/// start a worker for a peer that has already left.
fn on_change(shared: &Arc<FeedShared>, peer: PeerId, is_starter: bool) -> bool {
    let mut tracked = shared.tracked.lock().unwrap_or_else(PoisonError::into_inner);
    if tracked.contains(&peer) {
        return false;
    }
    let Some(entry) = shared.directory.read_key(&peer).filter(DirectoryEntry::is_server) else {
        return false;
    };
    tracked.insert(peer);
    spawn_worker(shared, peer, entry, is_starter);
    true
}

fn spawn_worker(shared: &Arc<FeedShared>, peer: PeerId, entry: DirectoryEntry, is_starter: bool) {
    shared.metrics.increment_workers_spawned();
    shared.worker_started();
    let peer_str = peer.to_string();
    let starter = if is_starter { "true" } else { "false" };
    Logger::trace(
        Event::WorkerSpawned,
        &[("peer", peer_str.as_str()), ("server", entry.name.as_str()), ("starter", starter)],
    );

    let worker = PeerWorker::new(Arc::clone(shared), peer, entry.server_id, entry.log_card, is_starter);
    shared.tasks.spawn(worker.run());
}

/// Watch the directory and spawn workers for peers that arrive later
async fn watch_membership(shared: Arc<FeedShared>, mut changes: watch::Receiver<u64>) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            changed = changes.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
        for (peer, entry) in shared.directory.read_all() {
            if entry.is_server() {
                on_change(&shared, peer, false);
            }
        }
    }
}

/// Shared change-feed machinery for one logs table
pub struct FeedMachinery {
    shared: Arc<FeedShared>,
}

impl FeedMachinery {
    /// Build the machinery and wait until every starter has discovered
    /// its peer's newest entry. `cancel` aborts the wait only; the
    /// machinery's own workers stop when it is dropped or shut down.
    pub async fn start(
        directory: Arc<dyn Directory>,
        fetcher: Arc<dyn LogFetcher>,
        config: LogsConfig,
        metrics: Arc<FeedMetrics>,
        cancel: &CancellationToken,
    ) -> LogsResult<Self> {
        config.validate()?;

        // Subscribe before the first read so no arrival slips between them.
        let mut changes = directory.changes();
        changes.borrow_and_update();

        let starters: Vec<PeerId> = directory
            .read_all()
            .into_iter()
            .filter(|(_, entry)| entry.is_server())
            .map(|(peer, _)| peer)
            .collect();

        let shared = Arc::new(FeedShared {
            directory,
            fetcher,
            config,
            metrics,
            sink: ChangeSink::new(),
            barrier: StartupBarrier::new(starters.len()),
            cancel: CancellationToken::new(),
            tracked: Mutex::new(HashSet::new()),
            tasks: TaskTracker::new(),
            active_workers: AtomicUsize::new(0),
        });

        let starter_count = starters.len().to_string();
        Logger::info(Event::FeedStart, &[("starters", starter_count.as_str())]);

        for peer in starters {
            if !on_change(&shared, peer, true) {
                // Left before we could spawn for it.
                shared.barrier.arrive();
            }
        }
        shared
            .tasks
            .spawn(watch_membership(Arc::clone(&shared), changes));

        let machinery = Self { shared };
        machinery.shared.barrier.wait(cancel).await?;
        Logger::info(Event::FeedReady, &[("starters", starter_count.as_str())]);
        Ok(machinery)
    }

    /// Register a subscriber.
    ///
    /// Holding the sink lock, reads every server's recent entries as the
    /// subscriber's initial rows. Entries newer than a tracked peer's
    /// low-water mark have not reached existing subscribers yet; they are
    /// sent to them now, oldest first, and the mark advances. The new
    /// subscriber is registered before the lock is released, so its first
    /// change is the first entry after its initial rows.
    pub async fn subscribe(&self, cancel: &CancellationToken) -> LogsResult<Subscription> {
        let shared = &self.shared;
        let mut state = shared.sink.lock(cancel).await?;

        let mut initial = Vec::new();
        let mut unseen: Vec<(PeerId, ServerId, Value, LogEntry)> = Vec::new();
        let reader = SnapshotReader::new(
            shared.directory.as_ref(),
            shared.fetcher.as_ref(),
            &shared.config,
            &shared.metrics,
        );
        reader
            .scan(cancel, |entry, peer, server_id, datum| {
                initial.push(encode_entry(entry, server_id, datum));
                if state
                    .last_timestamp(peer)
                    .is_some_and(|mark| mark < entry.timestamp)
                {
                    unseen.push((*peer, *server_id, datum.clone(), entry.clone()));
                }
            })
            .await?;

        unseen.sort_by_key(|(_, _, _, entry)| entry.timestamp);
        for (peer, server_id, datum, entry) in unseen {
            if state.advance_if_tracked(&peer, entry.timestamp) {
                let key = encode_key(entry.timestamp, server_id).print_primary();
                state.send_all_change(&RowChange::insert(key, encode_entry(&entry, &server_id, &datum)));
                shared.metrics.increment_rows_emitted();
            }
        }

        let changes = state.add_subscriber();
        drop(state);

        let rows = initial.len().to_string();
        Logger::info(Event::SubscriberAdded, &[("initial_rows", rows.as_str())]);
        Ok(Subscription { initial, changes })
    }

    /// Whether a worker currently tracks `peer`
    pub fn is_tracked(&self, peer: &PeerId) -> bool {
        self.shared.is_tracked(peer)
    }

    pub fn tracked_peers(&self) -> Vec<PeerId> {
        self.shared
            .tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// Workers spawned and not yet finished
    pub fn active_workers(&self) -> usize {
        self.shared.active_workers.load(Ordering::Acquire)
    }

    /// Spawn a worker for `peer` if it is connected and untracked.
    /// Returns whether a worker was spawned.
    pub fn track(&self, peer: PeerId) -> bool {
        on_change(&self.shared, peer, false)
    }

    /// Live subscriber count
    pub async fn subscriber_count(&self) -> LogsResult<usize> {
        let state = self.shared.sink.lock(&self.shared.cancel).await?;
        Ok(state.subscriber_count())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Cancel every worker and wait for all of them to stop
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        self.shared.tasks.close();
        self.shared.tasks.wait().await;
        Logger::info(Event::FeedShutdown, &[]);
    }
}

impl Drop for FeedMachinery {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl std::fmt::Debug for FeedMachinery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedMachinery")
            .field("tracked", &self.tracked_peers().len())
            .field("active_workers", &self.active_workers())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
