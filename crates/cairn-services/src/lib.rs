//! cairn-services — shared state and protocol logic for the Cairn mesh.
//!
//! The rendezvous side (peer table, bootstrap server) and the node side
//! (neighbor table, listener, initiator, bootstrap client) both live here;
//! the daemon binaries are thin wiring around these pieces.

pub mod bootstrap;
mod connection;
pub mod initiator;
pub mod listener;
pub mod neighbor;
pub mod node;
pub mod registry;
pub mod rendezvous;

pub use bootstrap::BootstrapHandle;
pub use neighbor::{
    new_neighbor_table, Direction, Neighbor, NeighborTable, RejectReason, SharedNeighbors,
    MAX_NEIGHBORS,
};
pub use node::PeerNode;
pub use registry::{new_peer_table, PeerTable, RegistryEntry, SharedPeerTable};
pub use rendezvous::RendezvousServer;
