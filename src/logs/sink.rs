//! # Change Delivery Sink
//!
//! The single ordered stream of row changes for one feed. Every worker, and
//! every new subscriber's initial read, goes through the same mutex, so a
//! subscriber never sees changes from two peers interleaved mid-batch and
//! never misses a change between its initial rows and its first update.
//!
//! The low-water marks live behind the same mutex: advancing a mark and
//! emitting the row for it is one step.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use super::directory::PeerId;
use super::errors::{LogsError, LogsResult};

/// One row-changed notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowChange {
    /// Printed primary key
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

impl RowChange {
    /// A row that did not exist before
    pub fn insert(key: String, row: Value) -> Self {
        Self {
            key,
            old_value: None,
            new_value: Some(row),
        }
    }
}

/// Receiving half handed to a subscriber
pub type ChangeReceiver = mpsc::UnboundedReceiver<RowChange>;

/// State guarded by the sink mutex
#[derive(Debug, Default)]
pub struct SinkState {
    subscribers: Vec<mpsc::UnboundedSender<RowChange>>,
    /// Newest timestamp already surfaced, per tracked peer
    last_timestamps: HashMap<PeerId, DateTime<Utc>>,
}

impl SinkState {
    /// Deliver a change to every live subscriber; closed ones are pruned
    pub fn send_all_change(&mut self, change: &RowChange) -> usize {
        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
        self.subscribers.len()
    }

    pub fn add_subscriber(&mut self) -> ChangeReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.iter().filter(|tx| !tx.is_closed()).count()
    }

    pub fn last_timestamp(&self, peer: &PeerId) -> Option<DateTime<Utc>> {
        self.last_timestamps.get(peer).copied()
    }

    pub fn set_last_timestamp(&mut self, peer: PeerId, timestamp: DateTime<Utc>) {
        self.last_timestamps.insert(peer, timestamp);
    }

    pub fn forget_peer(&mut self, peer: &PeerId) {
        self.last_timestamps.remove(peer);
    }

    /// Advance `peer`'s mark to `timestamp` if the peer is tracked and the
    /// timestamp is newer. Returns whether the mark moved.
    pub fn advance_if_tracked(&mut self, peer: &PeerId, timestamp: DateTime<Utc>) -> bool {
        match self.last_timestamps.get_mut(peer) {
            Some(mark) if *mark < timestamp => {
                *mark = timestamp;
                true
            }
            _ => false,
        }
    }
}

/// Mutex-guarded change stream shared by one feed
#[derive(Debug, Default)]
pub struct ChangeSink {
    state: Mutex<SinkState>,
}

impl ChangeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire exclusive access, or give up when `cancel` fires
    pub async fn lock(&self, cancel: &CancellationToken) -> LogsResult<MutexGuard<'_, SinkState>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LogsError::Interrupted),
            guard = self.state.lock() => Ok(guard),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_reaches_all_subscribers() {
        let sink = ChangeSink::new();
        let cancel = CancellationToken::new();
        let (mut rx1, mut rx2) = {
            let mut state = sink.lock(&cancel).await.unwrap();
            (state.add_subscriber(), state.add_subscriber())
        };

        let change = RowChange::insert("k".into(), json!({"id": "k"}));
        let delivered = sink.lock(&cancel).await.unwrap().send_all_change(&change);
        assert_eq!(delivered, 2);
        assert_eq!(rx1.recv().await.unwrap(), change);
        assert_eq!(rx2.recv().await.unwrap(), change);
    }

    #[tokio::test]
    async fn test_closed_subscribers_pruned() {
        let sink = ChangeSink::new();
        let cancel = CancellationToken::new();
        let mut state = sink.lock(&cancel).await.unwrap();
        let rx = state.add_subscriber();
        let _keep = state.add_subscriber();
        drop(rx);

        assert_eq!(state.subscriber_count(), 1);
        let delivered = state.send_all_change(&RowChange::insert("k".into(), json!(null)));
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn test_advance_only_tracked_and_newer() {
        use chrono::TimeZone;
        let t1 = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 1).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 2).unwrap();
        let peer = PeerId::new();
        let mut state = SinkState::default();

        assert!(!state.advance_if_tracked(&peer, t2));
        state.set_last_timestamp(peer, t1);
        assert!(state.advance_if_tracked(&peer, t2));
        assert!(!state.advance_if_tracked(&peer, t1));
        assert_eq!(state.last_timestamp(&peer), Some(t2));

        state.forget_peer(&peer);
        assert_eq!(state.last_timestamp(&peer), None);
    }

    #[tokio::test]
    async fn test_lock_is_cancellable() {
        let sink = ChangeSink::new();
        let cancel = CancellationToken::new();
        let _held = sink.lock(&cancel).await.unwrap();

        let other = CancellationToken::new();
        other.cancel();
        assert!(matches!(sink.lock(&other).await, Err(LogsError::Interrupted)));
    }
}
