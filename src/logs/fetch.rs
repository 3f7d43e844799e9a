//! # Log Fetch Interface
//!
//! Pull-style access to one peer's log: "give me up to N entries whose
//! timestamps fall in this window". Entries come back newest-first.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::directory::LogBusinessCard;
use super::entry::LogEntry;

/// Result type for log fetches
pub type FetchResult<T> = Result<T, FetchError>;

/// Boxed future returned by [`LogFetcher::fetch`]
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = FetchResult<Vec<LogEntry>>> + Send + 'a>>;

/// Why a fetch produced no entries
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The peer is unreachable or disconnected
    #[error("Transport error: {0}")]
    Transport(String),

    /// The peer is reachable but cannot read its log
    #[error("{0}")]
    Read(String),

    /// The caller's cancellation token fired
    #[error("Fetch interrupted")]
    Interrupted,
}

/// Inclusive time window; `None` leaves that side unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub min: Option<DateTime<Utc>>,
    pub max: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// The whole log
    pub fn all() -> Self {
        Self {
            min: None,
            max: None,
        }
    }

    /// Everything strictly newer than `t`
    pub fn after(t: DateTime<Utc>) -> Self {
        let min = t
            .checked_add_signed(chrono::Duration::nanoseconds(1))
            .unwrap_or(t);
        Self {
            min: Some(min),
            max: None,
        }
    }

    /// Exactly the instant `t`
    pub fn exactly(t: DateTime<Utc>) -> Self {
        Self {
            min: Some(t),
            max: Some(t),
        }
    }

    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        self.min.map_or(true, |min| *t >= min) && self.max.map_or(true, |max| *t <= max)
    }
}

/// Transport that reads a peer's log given its business card
pub trait LogFetcher: Send + Sync {
    /// Fetch up to `max_entries` entries in `range`, newest first
    fn fetch<'a>(
        &'a self,
        card: &'a LogBusinessCard,
        max_entries: usize,
        range: TimeRange,
        cancel: &'a CancellationToken,
    ) -> FetchFuture<'a>;
}

/// Run a fetch that resolves to `Interrupted` as soon as `cancel` fires,
/// whether or not the fetcher itself watches the token.
pub async fn fetch_interruptible(
    fetcher: &dyn LogFetcher,
    card: &LogBusinessCard,
    max_entries: usize,
    range: TimeRange,
    cancel: &CancellationToken,
) -> FetchResult<Vec<LogEntry>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Interrupted),
        result = fetcher.fetch(card, max_entries, range, cancel) => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_all_contains_everything() {
        let t = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        assert!(TimeRange::all().contains(&t));
        assert!(TimeRange::all().contains(&Utc::now()));
    }

    #[test]
    fn test_after_is_exclusive() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let range = TimeRange::after(t);
        assert!(!range.contains(&t));
        assert!(range.contains(&(t + chrono::Duration::nanoseconds(1))));
    }

    #[test]
    fn test_exactly_is_one_instant() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let range = TimeRange::exactly(t);
        assert!(range.contains(&t));
        assert!(!range.contains(&(t + chrono::Duration::nanoseconds(1))));
        assert!(!range.contains(&(t - chrono::Duration::nanoseconds(1))));
    }
}
