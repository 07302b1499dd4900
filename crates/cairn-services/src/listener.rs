//! Inbound peer listener — accepts join attempts and enforces the degree
//! bound.
//!
//! A joiner under capacity is admitted and acknowledged; a joiner hitting
//! the bound is redirected to one of the existing neighbors and closed.
//! The accept loop never blocks on a peer: each stream gets its own task.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};

use cairn_core::wire::{PeerControl, ACCEPTED_LINE};

use crate::connection::{control_loop, send_line};
use crate::neighbor::{Direction, Neighbor, RejectReason, SharedNeighbors};

pub struct PeerListener {
    listener: TcpListener,
    neighbors: SharedNeighbors,
    shutdown: broadcast::Receiver<()>,
}

impl PeerListener {
    pub fn new(
        listener: TcpListener,
        neighbors: SharedNeighbors,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            listener,
            neighbors,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("peer listener shutting down");
                    return Ok(());
                }

                result = self.listener.accept() => {
                    let (stream, remote) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    tracing::debug!(peer = %remote, "inbound connection");
                    let neighbors = self.neighbors.clone();
                    tokio::spawn(handle_inbound(stream, remote, neighbors));
                }
            }
        }
    }
}

/// Run admission for one inbound stream, then its control loop.
///
/// Inbound neighbors are keyed by their connection-origin address: the
/// accept handshake carries no listener advertisement.
async fn handle_inbound(stream: TcpStream, remote: SocketAddr, neighbors: SharedNeighbors) {
    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));
    let neighbor = Neighbor::new(writer.clone(), Direction::Inbound);

    match neighbors.try_insert(remote, neighbor).await {
        Ok(()) => {
            if let Err(e) = send_line(&writer, ACCEPTED_LINE).await {
                tracing::warn!(peer = %remote, error = %e, "failed to acknowledge join");
                neighbors.remove(&remote);
                return;
            }
            tracing::info!(
                peer = %remote,
                count = neighbors.len(),
                "neighbor admitted (inbound)"
            );
            control_loop(BufReader::new(read_half).lines(), remote, neighbors).await;
        }
        Err(RejectReason::Full) => {
            redirect_excess(&writer, remote, &neighbors).await;
        }
        Err(RejectReason::Duplicate) => {
            tracing::info!(peer = %remote, "duplicate neighbor endpoint, closing");
        }
    }
}

/// At capacity: name one existing neighbor and close without registering.
/// The neighbor map is never mutated on this path.
async fn redirect_excess(
    writer: &Arc<Mutex<tokio::net::tcp::OwnedWriteHalf>>,
    remote: SocketAddr,
    neighbors: &SharedNeighbors,
) {
    match neighbors.pick_random() {
        Some(target) => {
            let line = PeerControl::Redirect(target).to_string();
            match send_line(writer, &line).await {
                Ok(()) => {
                    tracing::info!(peer = %remote, target = %target, "redirected excess join")
                }
                Err(e) => {
                    tracing::warn!(peer = %remote, error = %e, "failed to send redirect")
                }
            }
        }
        None => {
            // Only reachable if the table emptied between the capacity
            // check and the pick; the protocol has no line for it.
            tracing::warn!(peer = %remote, "at capacity with no redirect target, closing");
        }
    }
}
