//! Feed metrics
//!
//! Monotonic counters, relaxed atomics. Shared by a table and every worker
//! it spawns.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for scans and tailing
#[derive(Debug, Default)]
pub struct FeedMetrics {
    rows_scanned: AtomicU64,
    rows_emitted: AtomicU64,
    overlap_discards: AtomicU64,
    fetch_failures: AtomicU64,
    workers_spawned: AtomicU64,
    workers_gone: AtomicU64,
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rows_scanned(&self, rows: u64) {
        self.rows_scanned.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn increment_rows_emitted(&self) {
        self.rows_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// A tailed entry was at or below the low-water mark
    pub fn increment_overlap_discards(&self) {
        self.overlap_discards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_fetch_failures(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_workers_spawned(&self) {
        self.workers_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_workers_gone(&self) {
        self.workers_gone.fetch_add(1, Ordering::Relaxed);
    }

    /// Workers spawned and not yet gone
    pub fn live_workers(&self) -> u64 {
        let spawned = self.workers_spawned.load(Ordering::Relaxed);
        spawned.saturating_sub(self.workers_gone.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_scanned: self.rows_scanned.load(Ordering::Relaxed),
            rows_emitted: self.rows_emitted.load(Ordering::Relaxed),
            overlap_discards: self.overlap_discards.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            workers_spawned: self.workers_spawned.load(Ordering::Relaxed),
            workers_gone: self.workers_gone.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of all counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub rows_scanned: u64,
    pub rows_emitted: u64,
    pub overlap_discards: u64,
    pub fetch_failures: u64,
    pub workers_spawned: u64,
    pub workers_gone: u64,
}
