//! Observable events
//!
//! Every structured log line names one of these.

use std::fmt;

/// Observable events in the logs table and its change feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    /// Cluster file loaded
    ConfigLoaded,

    // Change feed lifecycle
    /// Feed machinery constructed, starters spawned
    FeedStart,
    /// Every starter finished discovery
    FeedReady,
    /// A subscriber joined and received its initial rows
    SubscriberAdded,
    /// Feed machinery cancelled and drained
    FeedShutdown,

    // Peer workers
    /// Worker spawned for a newly seen peer
    WorkerSpawned,
    /// Worker found the newest entry of its peer
    WorkerDiscovered,
    /// Worker saw its peer leave the directory
    WorkerGone,
    /// Worker could not resolve its server and stopped
    WorkerAbandoned,
    /// One poll fetched new entries
    WorkerPolled,

    // Reads
    /// A server failed to read its log during a scan
    ScanReadFailure,
    /// A point lookup failed
    LookupFailed,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::FeedStart => "FEED_START",
            Event::FeedReady => "FEED_READY",
            Event::SubscriberAdded => "FEED_SUBSCRIBER_ADDED",
            Event::FeedShutdown => "FEED_SHUTDOWN",

            Event::WorkerSpawned => "WORKER_SPAWNED",
            Event::WorkerDiscovered => "WORKER_DISCOVERED",
            Event::WorkerGone => "WORKER_GONE",
            Event::WorkerAbandoned => "WORKER_ABANDONED",
            Event::WorkerPolled => "WORKER_POLLED",

            Event::ScanReadFailure => "SCAN_READ_FAILURE",
            Event::LookupFailed => "LOOKUP_FAILED",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_upper_snake() {
        let events = [
            Event::ConfigLoaded,
            Event::FeedStart,
            Event::FeedReady,
            Event::SubscriberAdded,
            Event::FeedShutdown,
            Event::WorkerSpawned,
            Event::WorkerDiscovered,
            Event::WorkerGone,
            Event::WorkerAbandoned,
            Event::WorkerPolled,
            Event::ScanReadFailure,
            Event::LookupFailed,
        ];
        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_event_display() {
        assert_eq!(Event::WorkerGone.to_string(), "WORKER_GONE");
    }
}
