//! Bootstrap client — registers this node with the rendezvous registry and
//! obtains an initial connection target.
//!
//! Runs once at startup. Every failure here is non-fatal: an unreachable
//! registry leaves the node running listener-only, able to receive inbound
//! joins.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use cairn_core::wire::{JoinReply, QUIT_LINE};

use crate::connection::send_line;
use crate::initiator;
use crate::neighbor::SharedNeighbors;

/// The long-lived bootstrap stream. After the initial exchange it carries
/// exactly one more message: the `quit` deregistration.
pub struct BootstrapHandle {
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl BootstrapHandle {
    /// Notify the registry that this node is leaving.
    pub async fn quit(&self) {
        if let Err(e) = send_line(&self.writer, QUIT_LINE).await {
            tracing::warn!(error = %e, "failed to send quit to registry");
        } else {
            tracing::info!("deregistered from registry");
        }
    }
}

/// Register `local` with the registry and act on its reply.
///
/// On a `Connect to:` reply the join attempt is spawned as its own task;
/// this function does not wait for the mesh to form. Returns `None` when
/// no usable bootstrap stream exists.
pub async fn register(
    registry: SocketAddr,
    local: SocketAddr,
    neighbors: SharedNeighbors,
    hop_limit: u32,
) -> Option<BootstrapHandle> {
    let stream = match TcpStream::connect(registry).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(
                registry = %registry,
                error = %e,
                "registry unreachable, continuing listener-only"
            );
            return None;
        }
    };
    // The bind address may be a wildcard; the bootstrap stream's source
    // address carries the IP this node is actually reachable at. Pair it
    // with the listener port to get the endpoint others will dial.
    let advertised = match stream.local_addr() {
        Ok(origin) => {
            tracing::info!(registry = %registry, origin = %origin, "connected to registry");
            SocketAddr::new(origin.ip(), local.port())
        }
        Err(_) => local,
    };

    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));

    if let Err(e) = send_line(&writer, &local.port().to_string()).await {
        tracing::warn!(error = %e, "failed to send listener port to registry");
        return None;
    }

    let mut lines = BufReader::new(read_half).lines();
    let reply = match lines.next_line().await {
        Ok(Some(line)) => line,
        Ok(None) => {
            tracing::warn!("registry closed the stream before replying");
            return None;
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to read registry reply");
            return None;
        }
    };

    match JoinReply::parse(&reply) {
        Ok(JoinReply::Target(target)) => {
            tracing::info!(target = %target, "bootstrap target received");
            tokio::spawn(initiator::establish(target, advertised, neighbors, hop_limit));
        }
        Ok(JoinReply::First) => {
            tracing::info!("first peer in the network");
        }
        Err(e) => {
            tracing::warn!(error = %e, "unrecognized bootstrap reply, staying unconnected");
        }
    }

    Some(BootstrapHandle { writer })
}
