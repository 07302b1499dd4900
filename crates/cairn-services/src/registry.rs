//! Rendezvous peer table — tracks currently registered peers.
//!
//! Keyed by the *connection-origin* address of each peer's bootstrap
//! stream (source address + ephemeral port), never by its listener
//! endpoint: two nodes behind the same address register distinct entries.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use rand::Rng;

/// Tracked state for a registered peer.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// Source address of the peer's bootstrap connection.
    pub origin: SocketAddr,

    /// Advertised listener endpoint — where other peers can dial it.
    pub listener: SocketAddr,

    /// When the registration was (last) accepted.
    pub registered_at: Instant,
}

/// The peer table — shared between the accept loop and every handler task.
pub struct PeerTable {
    peers: DashMap<SocketAddr, RegistryEntry>,
}

/// Shared handle to the peer table.
pub type SharedPeerTable = Arc<PeerTable>;

/// Create a new empty shared peer table.
pub fn new_peer_table() -> SharedPeerTable {
    Arc::new(PeerTable::new())
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerTable {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
        }
    }

    /// Insert or replace the entry for `origin`.
    /// Returns the replaced entry so the caller can log added vs. replaced.
    pub fn add(&self, origin: SocketAddr, listener: SocketAddr) -> Option<RegistryEntry> {
        self.peers.insert(
            origin,
            RegistryEntry {
                origin,
                listener,
                registered_at: Instant::now(),
            },
        )
    }

    /// Remove the entry for `origin`. Idempotent; reports whether anything
    /// was removed.
    pub fn remove(&self, origin: &SocketAddr) -> bool {
        self.peers.remove(origin).is_some()
    }

    /// Uniformly pick the listener endpoint of one registered peer whose
    /// origin differs from `origin`, from a snapshot of the table at call
    /// time. No memoization across calls.
    pub fn pick_random_excluding(&self, origin: SocketAddr) -> Option<SocketAddr> {
        let candidates: Vec<SocketAddr> = self
            .peers
            .iter()
            .filter(|entry| *entry.key() != origin)
            .map(|entry| entry.value().listener)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        Some(candidates[idx])
    }

    /// Origin addresses of all registered peers, for observability.
    pub fn list(&self) -> Vec<SocketAddr> {
        self.peers.iter().map(|entry| *entry.key()).collect()
    }

    /// Snapshot of all entries, for the shutdown fan-out.
    pub fn entries(&self) -> Vec<RegistryEntry> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
