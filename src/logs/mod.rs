//! # Cluster Logs Table
//!
//! Presents the log files of every connected cluster member as one
//! read-only table with point lookups, scans and a change feed.
//!
//! ## Architecture
//!
//! - **Row Codec**: `(timestamp, server)` keys and entry-to-row encoding
//! - **Snapshot Reader**: parallel fetch of every server's recent entries
//! - **Feed Machinery**: one tailing worker per connected server, a startup
//!   barrier, and a single ordered change sink shared by all subscribers
//! - **Fetchers**: in-memory and local-file implementations of the log
//!   transport
//!
//! Ordering is per server only. Rows from different servers carry each
//! server's own wall clock.

pub mod barrier;
pub mod codec;
pub mod config;
pub mod directory;
pub mod entry;
pub mod errors;
pub mod feed;
pub mod fetch;
pub mod file_fetcher;
pub mod memory;
pub mod sink;
pub mod snapshot;
pub mod table;
mod worker;

pub use barrier::StartupBarrier;
pub use codec::{decode_key, encode_entry, encode_key, format_time, server_datum, IdentifierFormat, RowKey};
pub use config::{LogsConfig, DISCOVERY_BACKOFF, ENTRIES_PER_SERVER, POLL_INTERVAL};
pub use directory::{
    Directory, DirectoryEntry, LogBusinessCard, MemoryDirectory, PeerId, PeerKind, ServerId,
};
pub use entry::{LogEntry, LogLevel};
pub use errors::{LogsError, LogsResult, READ_ONLY_MESSAGE};
pub use feed::{FeedMachinery, Subscription};
pub use fetch::{FetchError, FetchFuture, FetchResult, LogFetcher, TimeRange};
pub use file_fetcher::{format_line, parse_line, FileLogFetcher};
pub use memory::MemoryLogFetcher;
pub use sink::{ChangeReceiver, RowChange};
pub use snapshot::SnapshotReader;
pub use table::{LogsTable, PRIMARY_KEY, TABLE_NAME};
