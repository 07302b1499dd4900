//! Peer node runtime — wires the listener, neighbor table, and bootstrap
//! client into one startable unit.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use cairn_core::wire::DISCONNECT_LINE;

use crate::bootstrap::{self, BootstrapHandle};
use crate::connection::send_line;
use crate::initiator;
use crate::listener::PeerListener;
use crate::neighbor::{new_neighbor_table, SharedNeighbors};

/// A running peer node: accept loop spawned, bootstrap done (or failed
/// non-fatally), neighbor table live.
pub struct PeerNode {
    local: SocketAddr,
    neighbors: SharedNeighbors,
    bootstrap: Option<BootstrapHandle>,
    hop_limit: u32,
    shutdown: broadcast::Sender<()>,
}

impl PeerNode {
    /// Bind the peer listener (`listen` port 0 = OS-assigned), start the
    /// accept loop, and run bootstrap against `registry`.
    pub async fn start(
        registry: SocketAddr,
        listen: SocketAddr,
        hop_limit: u32,
    ) -> Result<Self> {
        let listener = TcpListener::bind(listen)
            .await
            .with_context(|| format!("failed to bind peer listener on {listen}"))?;
        let local = listener.local_addr()?;
        tracing::info!(listener = %local, "peer listener bound");

        let neighbors = new_neighbor_table();
        let (shutdown_tx, _) = broadcast::channel(1);

        let accept_loop = PeerListener::new(listener, neighbors.clone(), shutdown_tx.subscribe());
        tokio::spawn(async move {
            if let Err(e) = accept_loop.run().await {
                tracing::error!(error = %e, "peer listener exited");
            }
        });

        let bootstrap = bootstrap::register(registry, local, neighbors.clone(), hop_limit).await;

        Ok(Self {
            local,
            neighbors,
            bootstrap,
            hop_limit,
            shutdown: shutdown_tx,
        })
    }

    /// The endpoint other nodes dial to reach this one.
    pub fn local_endpoint(&self) -> SocketAddr {
        self.local
    }

    /// Shared handle to this node's neighbor table.
    pub fn neighbors(&self) -> SharedNeighbors {
        self.neighbors.clone()
    }

    /// Dial a peer directly, following redirects. The attempt runs in its
    /// own task.
    pub fn connect(&self, target: SocketAddr) {
        tokio::spawn(initiator::establish(
            target,
            self.local,
            self.neighbors.clone(),
            self.hop_limit,
        ));
    }

    /// Graceful shutdown: notify every neighbor, drain the table, tell the
    /// registry, and stop the accept loop. No acknowledgments are awaited.
    pub async fn quit(&self) {
        for (endpoint, neighbor) in self.neighbors.drain() {
            match send_line(&neighbor.writer, DISCONNECT_LINE).await {
                Ok(()) => tracing::info!(peer = %endpoint, "notified neighbor of disconnect"),
                Err(e) => {
                    tracing::warn!(peer = %endpoint, error = %e, "failed to notify neighbor")
                }
            }
        }

        if let Some(handle) = &self.bootstrap {
            handle.quit().await;
        }

        let _ = self.shutdown.send(());
        tracing::info!("disconnected from the network");
    }
}
