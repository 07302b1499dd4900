//! Neighbor table — the bounded set of live peer connections.
//!
//! Admission (capacity check + insert) is a single atomic step: concurrent
//! accepts serialize on the admission lock, so the table never exceeds
//! [`MAX_NEIGHBORS`] at any observable instant. Removal, random pick, and
//! enumeration go straight to the map.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use rand::Rng;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

/// Degree bound: a node holds at most this many concurrent neighbors.
pub const MAX_NEIGHBORS: usize = 3;

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One live connection to another node.
///
/// The read half lives in the control loop task that owns the stream; the
/// write half is kept here so disconnect notices can be sent at shutdown.
pub struct Neighbor {
    pub writer: Arc<Mutex<OwnedWriteHalf>>,
    pub direction: Direction,
    pub connected_at: Instant,
}

impl Neighbor {
    pub fn new(writer: Arc<Mutex<OwnedWriteHalf>>, direction: Direction) -> Self {
        Self {
            writer,
            direction,
            connected_at: Instant::now(),
        }
    }
}

/// Why an admission attempt was refused. Neither case is an error:
/// `Full` triggers the redirect path, `Duplicate` is logged and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("neighbor table full")]
    Full,
    #[error("duplicate neighbor endpoint")]
    Duplicate,
}

/// The neighbor table — shared between the listener, initiator, and
/// shutdown paths.
pub struct NeighborTable {
    peers: DashMap<SocketAddr, Neighbor>,
    admission: Mutex<()>,
}

/// Shared handle to the neighbor table.
pub type SharedNeighbors = Arc<NeighborTable>;

/// Create a new empty shared neighbor table.
pub fn new_neighbor_table() -> SharedNeighbors {
    Arc::new(NeighborTable::new())
}

impl Default for NeighborTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NeighborTable {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
            admission: Mutex::new(()),
        }
    }

    /// Atomic check-and-insert. Rejects (dropping `neighbor`) when the
    /// table is at capacity or already holds this endpoint.
    pub async fn try_insert(
        &self,
        endpoint: SocketAddr,
        neighbor: Neighbor,
    ) -> Result<(), RejectReason> {
        let _guard = self.admission.lock().await;
        if self.peers.len() >= MAX_NEIGHBORS {
            return Err(RejectReason::Full);
        }
        if self.peers.contains_key(&endpoint) {
            return Err(RejectReason::Duplicate);
        }
        self.peers.insert(endpoint, neighbor);
        Ok(())
    }

    pub fn remove(&self, endpoint: &SocketAddr) -> Option<Neighbor> {
        self.peers.remove(endpoint).map(|(_, neighbor)| neighbor)
    }

    pub fn contains(&self, endpoint: &SocketAddr) -> bool {
        self.peers.contains_key(endpoint)
    }

    /// Uniformly pick one neighbor endpoint from a snapshot of the table.
    /// Same selection policy as the registry's.
    pub fn pick_random(&self) -> Option<SocketAddr> {
        let endpoints: Vec<SocketAddr> = self.peers.iter().map(|entry| *entry.key()).collect();
        if endpoints.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..endpoints.len());
        Some(endpoints[idx])
    }

    /// Endpoints of all current neighbors, for observability.
    pub fn list(&self) -> Vec<SocketAddr> {
        self.peers.iter().map(|entry| *entry.key()).collect()
    }

    /// Endpoint, direction, and connection age of every neighbor, for the
    /// status snapshot.
    pub fn snapshot(&self) -> Vec<(SocketAddr, Direction, std::time::Duration)> {
        self.peers
            .iter()
            .map(|entry| {
                (
                    *entry.key(),
                    entry.value().direction,
                    entry.value().connected_at.elapsed(),
                )
            })
            .collect()
    }

    /// Remove and return every neighbor. Used by graceful shutdown.
    pub fn drain(&self) -> Vec<(SocketAddr, Neighbor)> {
        let endpoints = self.list();
        endpoints
            .into_iter()
            .filter_map(|ep| self.peers.remove(&ep))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
