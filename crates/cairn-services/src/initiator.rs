//! Outbound connection establishment with the bounded redirect chain.
//!
//! A dial either lands (acceptance received, neighbor registered), gets
//! redirected (close, consume one hop, retry the named endpoint), or dies
//! (connect failure, EOF, hop budget exhausted) — in which case the node
//! simply stays listener-only.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use cairn_core::wire::{PeerControl, DISCONNECT_LINE};

use crate::connection::{control_loop, send_line};
use crate::neighbor::{Direction, Neighbor, SharedNeighbors};

/// Dial `initial` and follow redirects until established or abandoned.
///
/// Runs in its own task; it blocks only itself. Outbound neighbors are
/// keyed by the dialed listener endpoint. `local` is the node's
/// advertised endpoint (effective IP, listener port), used to refuse
/// dialing ourselves.
pub async fn establish(
    initial: SocketAddr,
    local: SocketAddr,
    neighbors: SharedNeighbors,
    hop_limit: u32,
) {
    let mut target = initial;
    let mut hops = 0u32;

    loop {
        if is_self(target, local) {
            tracing::info!(target = %target, "attempted to connect to self, ignoring");
            return;
        }
        if neighbors.contains(&target) {
            tracing::info!(peer = %target, "already connected to peer, skipping dial");
            return;
        }

        let stream = match TcpStream::connect(target).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(peer = %target, error = %e, "dial failed");
                return;
            }
        };
        tracing::debug!(peer = %target, "dialed, awaiting acceptance");

        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(Mutex::new(write_half));
        let mut lines = BufReader::new(read_half).lines();

        let first = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::warn!(peer = %target, "stream closed before acceptance");
                return;
            }
            Err(e) => {
                tracing::warn!(peer = %target, error = %e, "read failed awaiting acceptance");
                return;
            }
        };

        match PeerControl::parse(&first) {
            Ok(PeerControl::Accepted) => {
                let neighbor = Neighbor::new(writer.clone(), Direction::Outbound);
                match neighbors.try_insert(target, neighbor).await {
                    Ok(()) => {
                        tracing::info!(
                            peer = %target,
                            count = neighbors.len(),
                            "neighbor admitted (outbound)"
                        );
                        control_loop(lines, target, neighbors).await;
                    }
                    Err(reason) => {
                        // Our own table changed while the dial was in
                        // flight; back out rather than exceed the bound.
                        tracing::info!(peer = %target, %reason, "backing out of accepted dial");
                        if let Err(e) = send_line(&writer, DISCONNECT_LINE).await {
                            tracing::warn!(peer = %target, error = %e, "failed to send disconnect");
                        }
                    }
                }
                return;
            }
            Ok(PeerControl::Redirect(next)) => {
                hops += 1;
                if hops > hop_limit {
                    tracing::warn!(
                        hops,
                        last = %next,
                        "redirect hop limit reached, abandoning join"
                    );
                    return;
                }
                tracing::info!(from = %target, to = %next, hop = hops, "following redirect");
                target = next;
                // current stream drops closed here
            }
            Ok(PeerControl::Disconnect) => {
                tracing::info!(peer = %target, "target disconnected before acceptance");
                return;
            }
            Err(e) => {
                tracing::warn!(peer = %target, error = %e, "unexpected line awaiting acceptance");
                return;
            }
        }
    }
}

/// Self-connection guard: the target is this node's own advertised
/// endpoint. Loopback aliases (127.0.0.0/8) count as the same host. A
/// wildcard bind is NOT treated as matching every host — `local` must be
/// the node's effective endpoint, not its bind address.
fn is_self(target: SocketAddr, local: SocketAddr) -> bool {
    target.port() == local.port()
        && (target.ip() == local.ip()
            || (target.ip().is_loopback() && local.ip().is_loopback()))
}
