//! # Membership Directory
//!
//! The cluster directory maps live connections (`PeerId`) to what each peer
//! advertises about itself. Peers appear when they connect and vanish when
//! they disconnect; a reconnecting server comes back under a new `PeerId`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

/// Identifier of one live connection to a cluster member
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    /// A fresh connection identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Stable identity of a cluster member, independent of connection churn
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServerId(pub Uuid);

impl ServerId {
    /// A fresh server identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of process sits behind a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    /// A data-bearing server with its own log
    Server,
    /// A proxy; keeps no log and never appears in the table
    Proxy,
}

/// Address handed to the log fetcher to reach a peer's log
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogBusinessCard(pub String);

impl LogBusinessCard {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn address(&self) -> &str {
        &self.0
    }
}

/// What a peer publishes in the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub server_id: ServerId,
    pub kind: PeerKind,
    /// Display name from the server's config
    pub name: String,
    pub log_card: LogBusinessCard,
}

impl DirectoryEntry {
    /// Entry for a log-bearing server
    pub fn server(server_id: ServerId, name: impl Into<String>, log_card: LogBusinessCard) -> Self {
        Self {
            server_id,
            kind: PeerKind::Server,
            name: name.into(),
            log_card,
        }
    }

    pub fn is_server(&self) -> bool {
        self.kind == PeerKind::Server
    }
}

/// Read access to the cluster directory plus a change signal
pub trait Directory: Send + Sync {
    /// Current entry for one peer, if connected
    fn read_key(&self, peer: &PeerId) -> Option<DirectoryEntry>;

    /// Point-in-time copy of every connected peer
    fn read_all(&self) -> Vec<(PeerId, DirectoryEntry)>;

    /// Receiver whose value changes after every directory mutation
    fn changes(&self) -> watch::Receiver<u64>;

    /// Connected peer currently serving `server`, if any
    fn peer_for_server(&self, server: &ServerId) -> Option<PeerId> {
        self.read_all()
            .into_iter()
            .find(|(_, entry)| entry.is_server() && entry.server_id == *server)
            .map(|(peer, _)| peer)
    }
}

/// In-process directory, used by the CLI and by tests
#[derive(Debug)]
pub struct MemoryDirectory {
    peers: RwLock<BTreeMap<PeerId, DirectoryEntry>>,
    version: watch::Sender<u64>,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDirectory {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            peers: RwLock::new(BTreeMap::new()),
            version,
        }
    }

    /// Connect a peer, returning its new connection id
    pub fn connect(&self, entry: DirectoryEntry) -> PeerId {
        let peer = PeerId::new();
        self.insert(peer, entry);
        peer
    }

    /// Publish or replace a peer's entry
    pub fn insert(&self, peer: PeerId, entry: DirectoryEntry) {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer, entry);
        self.bump();
    }

    /// Remove a peer; returns its last entry
    pub fn disconnect(&self, peer: &PeerId) -> Option<DirectoryEntry> {
        let removed = self
            .peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer);
        if removed.is_some() {
            self.bump();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

impl Directory for MemoryDirectory {
    fn read_key(&self, peer: &PeerId) -> Option<DirectoryEntry> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .cloned()
    }

    fn read_all(&self) -> Vec<(PeerId, DirectoryEntry)> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(peer, entry)| (*peer, entry.clone()))
            .collect()
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> DirectoryEntry {
        DirectoryEntry::server(ServerId::new(), name, LogBusinessCard::new(name))
    }

    #[test]
    fn test_connect_disconnect() {
        let dir = MemoryDirectory::new();
        let peer = dir.connect(entry("alpha"));
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.read_key(&peer).unwrap().name, "alpha");

        assert!(dir.disconnect(&peer).is_some());
        assert!(dir.read_key(&peer).is_none());
        assert!(dir.is_empty());
    }

    #[test]
    fn test_peer_for_server_ignores_proxies() {
        let dir = MemoryDirectory::new();
        let server_id = ServerId::new();
        let mut proxy = DirectoryEntry::server(server_id, "proxy", LogBusinessCard::new("p"));
        proxy.kind = PeerKind::Proxy;
        dir.connect(proxy);
        assert!(dir.peer_for_server(&server_id).is_none());

        let peer = dir.connect(DirectoryEntry::server(
            server_id,
            "alpha",
            LogBusinessCard::new("a"),
        ));
        assert_eq!(dir.peer_for_server(&server_id), Some(peer));
    }

    #[test]
    fn test_changes_signalled() {
        let dir = MemoryDirectory::new();
        let mut rx = dir.changes();
        rx.borrow_and_update();

        let peer = dir.connect(entry("alpha"));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        dir.disconnect(&peer);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_reconnect_gets_new_peer_id() {
        let dir = MemoryDirectory::new();
        let e = entry("alpha");
        let first = dir.connect(e.clone());
        dir.disconnect(&first);
        let second = dir.connect(e);
        assert_ne!(first, second);
    }
}
